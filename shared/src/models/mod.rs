pub mod coupon;
pub mod member;
pub mod order;
pub mod printer;
pub mod product;
pub mod promotion;

pub use coupon::{ClaimedCoupon, Coupon, CouponStatus, CouponType};
pub use member::{PointsEntry, PointsReason, PointsWallet};
pub use order::{Order, OrderItem, OrderStatus};
pub use printer::{CategoryBinding, PrintJob, PrintJobStatus, Printer, PrinterClass};
pub use product::{Category, Product, Variant};
pub use promotion::{Promotion, PromotionKind, PromotionTier};
