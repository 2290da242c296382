use std::sync::Arc;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::clock::FixedClock;
use crate::engine::attendance::check_in;
use crate::engine::dispatch::{accept_pickup, complete_pickup, request_pickup};
use crate::engine::station::assign_processing;
use crate::models::account::{Address, GeoPoint, Outlet, Role, User};
use crate::models::order::OrderItem;
use crate::models::work::Station;
use crate::state::AppState;

/// One outlet with a full cast of actors, clock pinned at 09:00.
pub(crate) struct Fixture {
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    pub outlet_id: Uuid,
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub driver_id: Uuid,
    pub second_driver_id: Uuid,
    pub off_duty_driver_id: Uuid,
    pub washer_id: Uuid,
    pub second_washer_id: Uuid,
    pub ironer_id: Uuid,
    pub packer_id: Uuid,
    pub admin_id: Uuid,
}

pub(crate) fn fixture() -> Fixture {
    fixture_inner(true)
}

pub(crate) fn fixture_without_admin() -> Fixture {
    fixture_inner(false)
}

fn fixture_inner(with_admin: bool) -> Fixture {
    let start = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::at(start));
    let state = AppState::with_clock(64, clock.clone());

    let outlet_id = Uuid::new_v4();
    state.outlets.insert(
        outlet_id,
        Outlet {
            id: outlet_id,
            name: "central".to_string(),
            location: GeoPoint {
                lat: 53.5511,
                lng: 9.9937,
            },
        },
    );

    let customer_id = seed_user(&state, "cara", Role::Customer, None, None);
    let address_id = Uuid::new_v4();
    state.addresses.insert(
        address_id,
        Address {
            id: address_id,
            customer_id,
            street: "Elbchaussee 1".to_string(),
            location: GeoPoint {
                lat: 53.5505,
                lng: 9.9930,
            },
        },
    );

    let driver_id = seed_user(&state, "dario", Role::Driver, Some(outlet_id), None);
    let second_driver_id = seed_user(&state, "dora", Role::Driver, Some(outlet_id), None);
    let off_duty_driver_id = seed_user(&state, "dietmar", Role::Driver, Some(outlet_id), None);
    let washer_id = seed_user(
        &state,
        "wanda",
        Role::Worker,
        Some(outlet_id),
        Some(Station::Washing),
    );
    let second_washer_id = seed_user(
        &state,
        "wilma",
        Role::Worker,
        Some(outlet_id),
        Some(Station::Washing),
    );
    let ironer_id = seed_user(
        &state,
        "ivo",
        Role::Worker,
        Some(outlet_id),
        Some(Station::Ironing),
    );
    let packer_id = seed_user(
        &state,
        "paula",
        Role::Worker,
        Some(outlet_id),
        Some(Station::Packing),
    );
    let admin_id = if with_admin {
        seed_user(&state, "astrid", Role::OutletAdmin, Some(outlet_id), None)
    } else {
        Uuid::new_v4()
    };

    for user in [
        driver_id,
        second_driver_id,
        washer_id,
        second_washer_id,
        ironer_id,
        packer_id,
    ] {
        check_in(&state, user).expect("check in fixture user");
    }

    Fixture {
        state,
        clock,
        outlet_id,
        customer_id,
        address_id,
        driver_id,
        second_driver_id,
        off_duty_driver_id,
        washer_id,
        second_washer_id,
        ironer_id,
        packer_id,
        admin_id,
    }
}

fn seed_user(
    state: &AppState,
    name: &str,
    role: Role,
    outlet_id: Option<Uuid>,
    station: Option<Station>,
) -> Uuid {
    let id = Uuid::new_v4();
    state.users.insert(
        id,
        User {
            id,
            name: name.to_string(),
            role,
            outlet_id,
            station,
            created_at: state.clock.now(),
        },
    );
    id
}

/// Two-line manifest with stable item ids, easy to perturb in tests.
pub(crate) fn manifest() -> Vec<OrderItem> {
    vec![
        OrderItem {
            laundry_item_id: Uuid::from_u128(0xA1),
            quantity: 3,
        },
        OrderItem {
            laundry_item_id: Uuid::from_u128(0xB2),
            quantity: 2,
        },
    ]
}

/// Drive a fresh order through pickup and intake so it sits at WASHING with
/// the standard manifest.
pub(crate) fn order_at_washing(fx: &Fixture) -> Uuid {
    let (order, pickup) = request_pickup(&fx.state, fx.customer_id, fx.address_id, None)
        .expect("request pickup");
    accept_pickup(&fx.state, fx.driver_id, pickup.id).expect("accept pickup");
    complete_pickup(&fx.state, fx.driver_id, pickup.id, None).expect("complete pickup");
    assign_processing(
        &fx.state,
        fx.admin_id,
        order.id,
        manifest(),
        45_000,
        4.5,
        None,
    )
    .expect("assign processing");
    order.id
}
