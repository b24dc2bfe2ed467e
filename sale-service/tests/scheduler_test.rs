//! Sale lifecycle: rotation, provisioning failure, and the periodic loop.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{epoch, settings, FaultyStore, Harness};
use sale_service::clock::ManualClock;
use sale_service::models::NewSale;
use sale_service::scheduler::SaleScheduler;
use sale_service::store::SaleStore;
use tokio::sync::watch;

#[tokio::test]
async fn test_cycle_opens_a_fully_stocked_sale() {
    let h = Harness::new(settings(25, 10));
    let sale = h.open_sale().await;

    assert!(sale.is_active);
    assert_eq!(sale.start_time, epoch());
    assert_eq!(sale.end_time, epoch() + chrono::Duration::hours(1));
    assert_eq!(sale.total_items, 25);
    assert_eq!(sale.sold_items, 0);

    for item_id in 1..=25 {
        let item = h.store.available_item(item_id, sale.id).await.unwrap().unwrap();
        assert_eq!(item.name, format!("Awesome Item #{}-{}", sale.id, item_id));
    }
    assert!(h.store.available_item(26, sale.id).await.unwrap().is_none());
    assert_eq!(h.service.current_sale().await.unwrap(), Some(sale));
}

#[tokio::test]
async fn test_each_cycle_leaves_exactly_one_active_sale() {
    let h = Harness::new(settings(3, 10));
    let first = h.open_sale().await;

    h.clock.advance(chrono::Duration::minutes(10));
    let second = h.open_sale().await;

    h.clock.advance(chrono::Duration::minutes(10));
    let third = h.open_sale().await;

    assert!(!h.store.sale(first.id).await.unwrap().unwrap().is_active);
    assert!(!h.store.sale(second.id).await.unwrap().unwrap().is_active);
    assert!(h.store.sale(third.id).await.unwrap().unwrap().is_active);
    assert_eq!(h.service.current_sale().await.unwrap().unwrap().id, third.id);

    // Items from a closed sale cannot be checked out any more.
    assert!(h.service.start_checkout("alice", 1, common::deadline()).await.is_err());
}

#[tokio::test]
async fn test_failed_provisioning_leaves_no_active_sale() {
    let store = Arc::new(FaultyStore {
        fail_create_items: true,
        ..FaultyStore::default()
    });
    let previous = store
        .inner
        .create_sale(NewSale {
            start_time: epoch(),
            end_time: epoch() + chrono::Duration::hours(1),
            total_items: 2,
            sold_items: 0,
            is_active: true,
        })
        .await
        .unwrap();
    let scheduler = SaleScheduler::new(
        store.clone(),
        Arc::new(ManualClock::new(epoch())),
        settings(2, 10),
    );

    let err = scheduler.run_cycle().await.unwrap_err();
    assert!(format!("{err:#}").contains("failed to provision items"));

    // The previous sale was closed and the half-built one never stays open.
    assert!(store.active_sale(epoch()).await.unwrap().is_none());
    assert!(!store.sale(previous.id).await.unwrap().unwrap().is_active);
    let half_built = store.sale(previous.id + 1).await.unwrap().unwrap();
    assert!(!half_built.is_active);
}

#[tokio::test]
async fn test_failed_close_aborts_the_cycle() {
    let store = Arc::new(FaultyStore {
        fail_deactivate_all: true,
        ..FaultyStore::default()
    });
    let scheduler = SaleScheduler::new(
        store.clone(),
        Arc::new(ManualClock::new(epoch())),
        settings(2, 10),
    );

    assert!(scheduler.run_cycle().await.is_err());
    assert!(store.sale(1).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_run_cycles_until_shutdown() {
    let h = Harness::new(settings(2, 10));
    let (tx, rx) = watch::channel(false);
    let scheduler = h.service.scheduler();
    let handle = tokio::spawn(async move { scheduler.run(rx).await });

    // The first tick fires immediately, the next after one cycle period.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let first = h.service.current_sale().await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    let second = h.service.current_sale().await.unwrap().unwrap();
    assert_ne!(first.id, second.id);
    assert!(!h.store.sale(first.id).await.unwrap().unwrap().is_active);

    tx.send(true).unwrap();
    handle.await.unwrap();

    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(h.service.current_sale().await.unwrap().unwrap().id, second.id);
}
