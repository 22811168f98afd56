//! End-to-end pipeline test: cart edits, order creation, print fan-out,
//! worker delivery and the realtime frames each step pushes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use shared::models::{
    Category, OrderStatus, PointsWallet, Printer, PrinterClass, PrintJobStatus, Product, Variant,
};
use table_server::cart::CartStore;
use table_server::common::{AppError, AppResult};
use table_server::live::Room;
use table_server::orders::{CreateOrderRequest, NewOrderItem, OrderLedger, OrderStorage};
use table_server::printing::{
    CONSUMER_GROUP, PrintDispatcher, PrintQueue, PrintStorage, PrintWorker, PrinterTransport,
};
use table_server::{Catalog, InMemoryCatalog, RoomManager};

/// Transport that succeeds and keeps what it sent.
struct RecordingTransport {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PrinterTransport for RecordingTransport {
    async fn send(&self, address: &str, payload: &[u8]) -> AppResult<()> {
        self.sent.lock().push((address.to_string(), payload.to_vec()));
        Ok(())
    }
}

struct Rig {
    catalog: Arc<InMemoryCatalog>,
    rooms: Arc<RoomManager>,
    carts: CartStore,
    ledger: OrderLedger,
    print_storage: PrintStorage,
    worker: PrintWorker,
    transport: Arc<RecordingTransport>,
    order_storage: OrderStorage,
}

fn seed_variant(catalog: &InMemoryCatalog, variant_id: &str, price: f64, stock: i64) {
    catalog.seed(
        Product {
            id: format!("p-{variant_id}"),
            store_id: "s1".to_string(),
            category_id: "c1".to_string(),
            name: format!("Product {variant_id}"),
            available: true,
        },
        Variant {
            id: variant_id.to_string(),
            product_id: format!("p-{variant_id}"),
            spec: None,
            price,
            stock,
        },
        Category {
            id: "c1".to_string(),
            store_id: "s1".to_string(),
            name: "Mains".to_string(),
        },
    );
}

fn rig() -> Rig {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.seed_table("s1", "t1");
    seed_variant(&catalog, "v1", 18.0, 50);
    seed_variant(&catalog, "v2", 8.5, 50);

    let rooms = Arc::new(RoomManager::new());
    let carts = CartStore::new(catalog.clone(), rooms.clone(), Duration::from_secs(60));

    let print_storage = PrintStorage::open_in_memory().unwrap();
    let queue = Arc::new(PrintQueue::new(print_storage.clone()));
    queue.ensure_group(CONSUMER_GROUP).unwrap();
    print_storage
        .put_printer(&Printer {
            id: "kitchen-1".to_string(),
            store_id: "s1".to_string(),
            name: "Kitchen".to_string(),
            class: PrinterClass::Kitchen,
            address: "127.0.0.1:9100".to_string(),
            enabled: true,
        })
        .unwrap();
    let dispatcher = Arc::new(PrintDispatcher::new(print_storage.clone(), queue.clone()));

    let order_storage = OrderStorage::open_in_memory().unwrap();
    let ledger = OrderLedger::new(
        order_storage.clone(),
        catalog.clone(),
        rooms.clone(),
        dispatcher,
        5,
    );

    let transport = Arc::new(RecordingTransport::new());
    let worker = PrintWorker::new(
        print_storage.clone(),
        queue,
        transport.clone(),
        rooms.clone(),
    )
    .with_poll_timeout(Duration::from_millis(20));

    Rig {
        catalog,
        rooms,
        carts,
        ledger,
        print_storage,
        worker,
        transport,
        order_storage,
    }
}

fn drain_events(frames: &mut UnboundedReceiver<String>) -> Vec<String> {
    let mut names = Vec::new();
    while let Ok(frame) = frames.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        names.push(value["event"].as_str().unwrap().to_string());
    }
    names
}

#[tokio::test]
async fn test_cart_to_printed_order() {
    let rig = rig();
    let (_store_conn, mut store_frames) = rig.rooms.register(Room::store("s1"));
    let (_table_conn, mut table_frames) = rig.rooms.register(Room::table("s1", "t1"));

    // Two guests build the cart together
    rig.carts
        .add_item("s1", "t1", "v1", 2, None, "alice")
        .await
        .unwrap();
    let cart = rig
        .carts
        .add_item("s1", "t1", "v2", 1, None, "bob")
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 2);
    assert_eq!(drain_events(&mut table_frames), vec!["cart_updated", "cart_updated"]);

    let items = cart
        .items
        .iter()
        .map(|i| NewOrderItem {
            variant_id: i.variant_id.clone(),
            quantity: i.quantity,
            attrs: i.attrs.clone(),
        })
        .collect();
    let detail = rig
        .ledger
        .create_order(CreateOrderRequest {
            store_id: "s1".to_string(),
            table_id: "t1".to_string(),
            user_id: None,
            items,
            coupon_id: None,
            use_points: None,
            remark: Some("no onions".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert_eq!(detail.order.total_amount, 44.5);
    assert_eq!(detail.order.pay_amount, 44.5);
    assert!(detail.order.order_no.ends_with("-0001"));

    // Dispatch created one kitchen job; the worker delivers it
    let processed = rig.worker.poll_once().await.unwrap();
    assert_eq!(processed, 1);

    let jobs = rig.print_storage.list_jobs_for_order(&detail.order.id).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, PrintJobStatus::Success);

    let sent = rig.transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "127.0.0.1:9100");
    let ticket = String::from_utf8(sent[0].1.clone()).unwrap();
    assert!(ticket.contains("TABLE t1"));
    assert!(ticket.contains("no onions"));

    let events = drain_events(&mut store_frames);
    assert!(events.contains(&"new_order".to_string()));
    assert!(events.contains(&"print_job_completed".to_string()));

    // Stock was deducted at creation
    assert!(!rig.catalog.check_stock("v1", 49).await.unwrap());
}

#[tokio::test]
async fn test_paid_points_and_refund_round_trip() {
    let rig = rig();

    let detail = rig
        .ledger
        .create_order(CreateOrderRequest {
            store_id: "s1".to_string(),
            table_id: "t1".to_string(),
            user_id: Some("u1".to_string()),
            items: vec![NewOrderItem {
                variant_id: "v1".to_string(),
                quantity: 1,
                attrs: None,
            }],
            coupon_id: None,
            use_points: None,
            remark: None,
        })
        .await
        .unwrap();

    // Paying credits floor(pay_amount) points exactly once
    rig.ledger
        .update_status(&detail.order.id, OrderStatus::Paid)
        .await
        .unwrap();
    assert_eq!(rig.ledger.points_balance("s1", "u1").unwrap(), 18);

    let err = rig
        .ledger
        .update_status(&detail.order.id, OrderStatus::Paid)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::State(_)));

    // Refund restores stock and marks every line refunded
    let refunded = rig.ledger.refund(&detail.order.id).await.unwrap();
    assert_eq!(refunded.order.status, OrderStatus::Refunded);
    assert_eq!(refunded.items[0].refunded_quantity, 1);
    assert!(rig.catalog.check_stock("v1", 50).await.unwrap());

    // Earned points survive the refund; only redeemed points are returned
    assert_eq!(rig.ledger.points_balance("s1", "u1").unwrap(), 18);
}

#[tokio::test]
async fn test_points_redemption_against_seeded_wallet() {
    let rig = rig();
    rig.order_storage
        .put_wallet(&PointsWallet {
            store_id: "s1".to_string(),
            user_id: "u1".to_string(),
            balance: 1000,
        })
        .unwrap();

    let detail = rig
        .ledger
        .create_order(CreateOrderRequest {
            store_id: "s1".to_string(),
            table_id: "t1".to_string(),
            user_id: Some("u1".to_string()),
            items: vec![NewOrderItem {
                variant_id: "v1".to_string(),
                quantity: 1,
                attrs: None,
            }],
            coupon_id: None,
            use_points: Some(1000),
            remark: None,
        })
        .await
        .unwrap();

    // 18.00 total caps redemption at half: 900 points = 9.00 off
    assert_eq!(detail.order.points_used, 900);
    assert_eq!(detail.order.points_discount, 9.0);
    assert_eq!(detail.order.pay_amount, 9.0);
    assert_eq!(rig.ledger.points_balance("s1", "u1").unwrap(), 100);
}
