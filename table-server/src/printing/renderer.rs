//! Ticket and receipt renderer.
//!
//! Renders order data into fixed-width plain text for thermal printers.
//! Output is deterministic for a given order, so re-sent jobs produce
//! identical paper.

use shared::models::{Order, OrderItem, PrinterClass};

/// 80mm paper
const WIDTH: usize = 48;

pub struct TicketRenderer {
    width: usize,
}

impl TicketRenderer {
    pub fn new() -> Self {
        Self { width: WIDTH }
    }

    /// Render the content for one printer. Kitchen and label printers get
    /// a preparation ticket for their items; receipt printers get the
    /// full bill.
    pub fn render(&self, order: &Order, items: &[OrderItem], class: PrinterClass) -> String {
        match class {
            PrinterClass::Receipt => self.render_receipt(order, items),
            PrinterClass::Kitchen | PrinterClass::Label => self.render_ticket(order, items),
        }
    }

    fn render_ticket(&self, order: &Order, items: &[OrderItem]) -> String {
        let mut out = String::new();
        out.push_str(&self.center(&format!("TABLE {}", order.table_id)));
        out.push_str(&self.center(&format!("#{}", order.order_no)));
        out.push_str(&self.sep('='));

        for item in items {
            out.push_str(&self.two_col(&item.name, &format!("x{}", item.quantity)));
            if let Some(spec) = &item.spec {
                out.push_str(&format!("  {spec}\n"));
            }
            if let Some(attrs) = &item.attrs {
                out.push_str(&format!("  {attrs}\n"));
            }
        }

        if let Some(remark) = &order.remark {
            out.push_str(&self.sep('-'));
            out.push_str(&format!("NOTE: {remark}\n"));
        }
        out.push_str(&self.sep('='));
        out
    }

    fn render_receipt(&self, order: &Order, items: &[OrderItem]) -> String {
        let mut out = String::new();
        out.push_str(&self.center(&format!("ORDER {}", order.order_no)));
        out.push_str(&self.center(&format!("Table {}", order.table_id)));
        out.push_str(&self.sep('='));

        for item in items {
            let line_total = item.price * item.quantity as f64;
            out.push_str(&self.two_col(
                &format!("{} x{}", item.name, item.quantity),
                &format!("{line_total:.2}"),
            ));
        }

        out.push_str(&self.sep('-'));
        out.push_str(&self.two_col("Subtotal", &format!("{:.2}", order.total_amount)));
        if order.coupon_discount > 0.0 {
            out.push_str(&self.two_col("Coupon", &format!("-{:.2}", order.coupon_discount)));
        }
        if order.points_discount > 0.0 {
            out.push_str(&self.two_col(
                &format!("Points ({})", order.points_used),
                &format!("-{:.2}", order.points_discount),
            ));
        }
        out.push_str(&self.two_col("TOTAL", &format!("{:.2}", order.pay_amount)));
        out.push_str(&self.sep('='));
        out
    }

    fn sep(&self, c: char) -> String {
        let mut line: String = std::iter::repeat(c).take(self.width).collect();
        line.push('\n');
        line
    }

    fn center(&self, text: &str) -> String {
        let pad = self.width.saturating_sub(text.chars().count()) / 2;
        format!("{}{}\n", " ".repeat(pad), text)
    }

    fn two_col(&self, left: &str, right: &str) -> String {
        let used = left.chars().count() + right.chars().count();
        let gap = self.width.saturating_sub(used).max(1);
        format!("{}{}{}\n", left, " ".repeat(gap), right)
    }
}

impl Default for TicketRenderer {
    fn default() -> Self {
        Self::new()
    }
}
