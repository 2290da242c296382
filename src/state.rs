use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::engine::notify::NotificationEvent;
use crate::models::account::{Address, Attendance, Outlet, User};
use crate::models::fulfillment::{DeliveryOrder, DriverSession, PickupOrder};
use crate::models::notification::{Notification, NotificationReceipt};
use crate::models::order::{Order, PaymentStatus};
use crate::models::work::{OrderWorkProcess, Station, WorkerShift};
use crate::observability::metrics::Metrics;

/// In-process store stand-in. Tables that carry a uniqueness invariant are
/// keyed by that invariant's domain, so the per-entry lock doubles as the
/// conditional write of a backing transactional store.
pub struct AppState {
    pub users: DashMap<Uuid, User>,
    pub outlets: DashMap<Uuid, Outlet>,
    pub addresses: DashMap<Uuid, Address>,
    pub orders: DashMap<Uuid, Order>,
    pub pickups: DashMap<Uuid, PickupOrder>,
    pub deliveries: DashMap<Uuid, DeliveryOrder>,
    pub payments: DashMap<Uuid, PaymentStatus>,
    /// Keyed by (order, station): one active work process per station visit.
    pub work_processes: DashMap<(Uuid, Station), OrderWorkProcess>,
    /// Keyed by worker user id: one open shift per worker.
    pub worker_shifts: DashMap<Uuid, WorkerShift>,
    /// Keyed by driver user id: one open session per driver.
    pub driver_sessions: DashMap<Uuid, DriverSession>,
    /// Keyed by user id: one open attendance row per user per day.
    pub attendance: DashMap<Uuid, Attendance>,
    pub notifications: DashMap<Uuid, Notification>,
    pub user_inbox: DashMap<Uuid, NotificationReceipt>,
    pub worker_inbox: DashMap<Uuid, NotificationReceipt>,
    pub driver_inbox: DashMap<Uuid, NotificationReceipt>,
    pub admin_inbox: DashMap<Uuid, NotificationReceipt>,
    pub notification_events_tx: broadcast::Sender<NotificationEvent>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Metrics,
    order_seq: AtomicU64,
    pickup_seq: AtomicU64,
    delivery_seq: AtomicU64,
}

impl AppState {
    pub fn new(event_buffer_size: usize) -> Self {
        Self::with_clock(event_buffer_size, Arc::new(SystemClock))
    }

    pub fn with_clock(event_buffer_size: usize, clock: Arc<dyn Clock>) -> Self {
        let (notification_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            users: DashMap::new(),
            outlets: DashMap::new(),
            addresses: DashMap::new(),
            orders: DashMap::new(),
            pickups: DashMap::new(),
            deliveries: DashMap::new(),
            payments: DashMap::new(),
            work_processes: DashMap::new(),
            worker_shifts: DashMap::new(),
            driver_sessions: DashMap::new(),
            attendance: DashMap::new(),
            notifications: DashMap::new(),
            user_inbox: DashMap::new(),
            worker_inbox: DashMap::new(),
            driver_inbox: DashMap::new(),
            admin_inbox: DashMap::new(),
            notification_events_tx,
            clock,
            metrics: Metrics::new(),
            order_seq: AtomicU64::new(0),
            pickup_seq: AtomicU64::new(0),
            delivery_seq: AtomicU64::new(0),
        }
    }

    pub fn next_order_number(&self) -> String {
        format!("LDY-{:06}", self.order_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn next_pickup_number(&self) -> String {
        format!("PU-{:06}", self.pickup_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn next_delivery_number(&self) -> String {
        format!("DLV-{:06}", self.delivery_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
