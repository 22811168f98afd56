//! Promotion discount calculation.
//!
//! Promotions are evaluated in priority order (highest first) over the
//! amount remaining after coupon and points. Evaluation stops after the
//! first promotion that applies, unless that promotion is stackable.

use rust_decimal::Decimal;
use serde::Serialize;
use shared::models::{Promotion, PromotionKind};

use super::{PricedLine, round_money, to_decimal, to_f64};

/// One promotion that contributed to the final discount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedPromotion {
    pub promotion_id: String,
    pub name: String,
    pub discount: f64,
}

/// Evaluate promotions against the order lines and remaining amount.
///
/// Returns the total discount and the promotions that produced it.
pub fn compute_promotions(
    promotions: &[Promotion],
    lines: &[PricedLine],
    amount: Decimal,
    store_id: &str,
    is_new_user: bool,
    now: i64,
) -> (Decimal, Vec<AppliedPromotion>) {
    let mut candidates: Vec<&Promotion> = promotions
        .iter()
        .filter(|p| p.store_id == store_id && p.is_live(now))
        .filter(|p| !p.new_user_only || is_new_user)
        .collect();
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut total = Decimal::ZERO;
    let mut applied = Vec::new();

    for promo in candidates {
        let remaining = (amount - total).max(Decimal::ZERO);
        if remaining <= Decimal::ZERO {
            break;
        }
        let discount = compute_one(promo, lines, remaining);
        if discount <= Decimal::ZERO {
            continue;
        }
        let discount = round_money(discount.min(remaining));
        total += discount;
        applied.push(AppliedPromotion {
            promotion_id: promo.id.clone(),
            name: promo.name.clone(),
            discount: to_f64(discount),
        });
        if !promo.stackable {
            break;
        }
    }

    (round_money(total), applied)
}

fn compute_one(promo: &Promotion, lines: &[PricedLine], amount: Decimal) -> Decimal {
    match promo.kind {
        PromotionKind::FullReduce => full_reduce(promo, amount),
        PromotionKind::Discount | PromotionKind::TimeLimited => rate_discount(promo, amount),
        PromotionKind::SecondHalfPrice => second_half_price(promo, lines),
        PromotionKind::QuantityDiscount => quantity_discount(promo, lines),
        PromotionKind::BuyOneGetOne => buy_one_get_one(promo, lines),
    }
}

/// Pick the highest-minimum tier the amount qualifies for.
fn full_reduce(promo: &Promotion, amount: Decimal) -> Decimal {
    promo
        .tiers
        .iter()
        .filter(|t| amount >= to_decimal(t.minimum))
        .max_by(|a, b| {
            to_decimal(a.minimum)
                .cmp(&to_decimal(b.minimum))
        })
        .map(|t| to_decimal(t.value))
        .unwrap_or(Decimal::ZERO)
}

/// `amount × (1 − rate)`, capped by `max_discount` when set.
fn rate_discount(promo: &Promotion, amount: Decimal) -> Decimal {
    let Some(rate) = promo.discount_rate else {
        return Decimal::ZERO;
    };
    let raw = amount * (Decimal::ONE - to_decimal(rate));
    match promo.max_discount {
        Some(cap) => raw.min(to_decimal(cap)),
        None => raw,
    }
}

/// Sort lines by price descending; within each line, every complete pair
/// discounts its second unit by `(1 − second_item_rate)`. An optional cap
/// bounds the total number of discounted units.
fn second_half_price(promo: &Promotion, lines: &[PricedLine]) -> Decimal {
    let Some(rate) = promo.second_item_rate else {
        return Decimal::ZERO;
    };
    let per_unit_factor = Decimal::ONE - to_decimal(rate);
    let mut budget = promo.max_discounted_items.map(|c| c as i64).unwrap_or(i64::MAX);

    let mut sorted: Vec<&PricedLine> = lines.iter().collect();
    sorted.sort_by(|a, b| {
        to_decimal(b.price)
            .cmp(&to_decimal(a.price))
    });

    let mut discount = Decimal::ZERO;
    for line in sorted {
        if budget <= 0 {
            break;
        }
        let pairs = (line.quantity as i64 / 2).min(budget);
        if pairs <= 0 {
            continue;
        }
        discount += to_decimal(line.price) * per_unit_factor * Decimal::from(pairs);
        budget -= pairs;
    }
    discount
}

fn line_qualifies(promo: &Promotion, line: &PricedLine) -> bool {
    if promo.product_ids.is_empty() && promo.category_ids.is_empty() {
        return true;
    }
    promo.product_ids.iter().any(|p| p == &line.product_id)
        || promo.category_ids.iter().any(|c| c == &line.category_id)
}

/// Sum qualifying quantities, pick the highest minimum-quantity tier met,
/// discount the qualifying subtotal by that tier's pay-rate.
fn quantity_discount(promo: &Promotion, lines: &[PricedLine]) -> Decimal {
    let qualifying: Vec<&PricedLine> = lines
        .iter()
        .filter(|l| line_qualifies(promo, l))
        .collect();
    let total_qty: i64 = qualifying.iter().map(|l| l.quantity as i64).sum();

    let Some(tier) = promo
        .tiers
        .iter()
        .filter(|t| total_qty >= t.minimum as i64)
        .max_by(|a, b| to_decimal(a.minimum).cmp(&to_decimal(b.minimum)))
    else {
        return Decimal::ZERO;
    };

    let subtotal: Decimal = qualifying.iter().map(|l| l.line_total()).sum();
    subtotal * (Decimal::ONE - to_decimal(tier.value))
}

/// `sets = floor(bought / buy_quantity)` capped by `max_sets`; the gift is
/// priced at the cheapest qualifying unit.
fn buy_one_get_one(promo: &Promotion, lines: &[PricedLine]) -> Decimal {
    let (Some(buy_qty), Some(get_qty)) = (promo.buy_quantity, promo.get_quantity) else {
        return Decimal::ZERO;
    };
    if buy_qty == 0 {
        return Decimal::ZERO;
    }

    let qualifying: Vec<&PricedLine> = lines
        .iter()
        .filter(|l| line_qualifies(promo, l))
        .collect();
    let bought: i64 = qualifying.iter().map(|l| l.quantity as i64).sum();
    let mut sets = bought / buy_qty as i64;
    if let Some(max) = promo.max_sets {
        sets = sets.min(max as i64);
    }
    if sets <= 0 {
        return Decimal::ZERO;
    }

    let gift_price = qualifying
        .iter()
        .map(|l| to_decimal(l.price))
        .min()
        .unwrap_or(Decimal::ZERO);

    gift_price * Decimal::from(get_qty) * Decimal::from(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::PromotionTier;

    fn base_promo(kind: PromotionKind) -> Promotion {
        Promotion {
            id: "pr1".into(),
            store_id: "s1".into(),
            name: "Promo".into(),
            kind,
            priority: 0,
            stackable: false,
            new_user_only: false,
            active: true,
            start_time: 0,
            end_time: i64::MAX,
            tiers: vec![],
            discount_rate: None,
            max_discount: None,
            second_item_rate: None,
            max_discounted_items: None,
            product_ids: vec![],
            category_ids: vec![],
            buy_quantity: None,
            get_quantity: None,
            max_sets: None,
        }
    }

    fn line(product: &str, price: f64, qty: i32) -> PricedLine {
        PricedLine {
            product_id: product.to_string(),
            category_id: "c1".to_string(),
            price,
            quantity: qty,
        }
    }

    #[test]
    fn test_scenario_c_second_half_price() {
        // rate=0.5 over [{20,2},{10,2}] ⇒ 20×0.5 + 10×0.5 = 15
        let mut promo = base_promo(PromotionKind::SecondHalfPrice);
        promo.second_item_rate = Some(0.5);

        let lines = vec![line("a", 20.0, 2), line("b", 10.0, 2)];
        let (d, applied) =
            compute_promotions(&[promo], &lines, to_decimal(60.0), "s1", false, 100);
        assert_eq!(to_f64(d), 15.0);
        assert_eq!(applied.len(), 1);
    }

    #[test]
    fn test_second_half_price_item_cap_prefers_expensive() {
        // Cap of 1 discounted unit: only the ¥20 pair counts
        let mut promo = base_promo(PromotionKind::SecondHalfPrice);
        promo.second_item_rate = Some(0.5);
        promo.max_discounted_items = Some(1);

        let lines = vec![line("b", 10.0, 2), line("a", 20.0, 2)];
        let (d, _) = compute_promotions(&[promo], &lines, to_decimal(60.0), "s1", false, 100);
        assert_eq!(to_f64(d), 10.0);
    }

    #[test]
    fn test_full_reduce_picks_highest_qualifying_tier() {
        let mut promo = base_promo(PromotionKind::FullReduce);
        promo.tiers = vec![
            PromotionTier { minimum: 50.0, value: 5.0 },
            PromotionTier { minimum: 100.0, value: 15.0 },
            PromotionTier { minimum: 200.0, value: 40.0 },
        ];

        let lines = vec![line("a", 60.0, 2)];
        let (d, _) = compute_promotions(
            &[promo.clone()],
            &lines,
            to_decimal(120.0),
            "s1",
            false,
            100,
        );
        assert_eq!(to_f64(d), 15.0);

        // Below every tier: no discount
        let (d, applied) =
            compute_promotions(&[promo], &lines, to_decimal(40.0), "s1", false, 100);
        assert_eq!(to_f64(d), 0.0);
        assert!(applied.is_empty());
    }

    #[test]
    fn test_rate_discount_with_cap() {
        let mut promo = base_promo(PromotionKind::Discount);
        promo.discount_rate = Some(0.8); // pay 80%
        promo.max_discount = Some(10.0);

        let lines = vec![line("a", 100.0, 1)];
        let (d, _) = compute_promotions(&[promo], &lines, to_decimal(100.0), "s1", false, 100);
        // 20% of 100 = 20, capped at 10
        assert_eq!(to_f64(d), 10.0);
    }

    #[test]
    fn test_quantity_discount_tiered_on_allow_list() {
        let mut promo = base_promo(PromotionKind::QuantityDiscount);
        promo.product_ids = vec!["a".to_string()];
        promo.tiers = vec![
            PromotionTier { minimum: 3.0, value: 0.9 },
            PromotionTier { minimum: 5.0, value: 0.8 },
        ];

        // 5 qualifying units of ¥10 → pay-rate 0.8 → 20% of ¥50 = ¥10
        let lines = vec![line("a", 10.0, 5), line("other", 99.0, 1)];
        let (d, _) = compute_promotions(&[promo], &lines, to_decimal(149.0), "s1", false, 100);
        assert_eq!(to_f64(d), 10.0);
    }

    #[test]
    fn test_buy_one_get_one_sets_and_cap() {
        let mut promo = base_promo(PromotionKind::BuyOneGetOne);
        promo.buy_quantity = Some(2);
        promo.get_quantity = Some(1);
        promo.max_sets = Some(2);

        // 6 bought → 3 sets, capped at 2; gift = cheapest unit ¥8
        let lines = vec![line("a", 12.0, 4), line("b", 8.0, 2)];
        let (d, _) = compute_promotions(&[promo], &lines, to_decimal(64.0), "s1", false, 100);
        assert_eq!(to_f64(d), 16.0);
    }

    #[test]
    fn test_new_user_promotion_skipped_for_regulars() {
        let mut promo = base_promo(PromotionKind::FullReduce);
        promo.new_user_only = true;
        promo.tiers = vec![PromotionTier { minimum: 10.0, value: 5.0 }];

        let lines = vec![line("a", 50.0, 1)];
        let (d, _) = compute_promotions(
            &[promo.clone()],
            &lines,
            to_decimal(50.0),
            "s1",
            false,
            100,
        );
        assert_eq!(to_f64(d), 0.0);

        let (d, _) = compute_promotions(&[promo], &lines, to_decimal(50.0), "s1", true, 100);
        assert_eq!(to_f64(d), 5.0);
    }

    #[test]
    fn test_non_stackable_stops_evaluation() {
        let mut first = base_promo(PromotionKind::FullReduce);
        first.priority = 10;
        first.tiers = vec![PromotionTier { minimum: 10.0, value: 5.0 }];

        let mut second = base_promo(PromotionKind::Discount);
        second.id = "pr2".into();
        second.priority = 1;
        second.discount_rate = Some(0.9);

        let lines = vec![line("a", 100.0, 1)];
        let (d, applied) = compute_promotions(
            &[second.clone(), first.clone()],
            &lines,
            to_decimal(100.0),
            "s1",
            false,
            100,
        );
        // Higher-priority FullReduce applies and stops evaluation
        assert_eq!(to_f64(d), 5.0);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].promotion_id, "pr1");

        // Stackable: both apply
        first.stackable = true;
        let (d, applied) = compute_promotions(
            &[second, first],
            &lines,
            to_decimal(100.0),
            "s1",
            false,
            100,
        );
        // 5 + 10% of remaining 95 = 5 + 9.5
        assert_eq!(to_f64(d), 14.5);
        assert_eq!(applied.len(), 2);
    }

    #[test]
    fn test_inactive_and_out_of_window_skipped() {
        let mut promo = base_promo(PromotionKind::FullReduce);
        promo.tiers = vec![PromotionTier { minimum: 10.0, value: 5.0 }];
        promo.active = false;

        let lines = vec![line("a", 50.0, 1)];
        let (d, _) = compute_promotions(
            &[promo.clone()],
            &lines,
            to_decimal(50.0),
            "s1",
            false,
            100,
        );
        assert_eq!(to_f64(d), 0.0);

        promo.active = true;
        promo.end_time = 50; // Window already closed
        let (d, _) = compute_promotions(&[promo], &lines, to_decimal(50.0), "s1", false, 100);
        assert_eq!(to_f64(d), 0.0);
    }
}
