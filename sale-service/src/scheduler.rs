use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use shared::{Sale, SaleId, SaleSettings};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use crate::clock::Clock;
use crate::models::{NewItem, NewSale};
use crate::store::SaleStore;

/// Closes the previous sale and opens a freshly stocked one, once at start
/// and then every cycle period. Only one scheduler may run per deployment.
pub struct SaleScheduler {
    store: Arc<dyn SaleStore>,
    clock: Arc<dyn Clock>,
    settings: SaleSettings,
}

impl SaleScheduler {
    pub fn new(store: Arc<dyn SaleStore>, clock: Arc<dyn Clock>, settings: SaleSettings) -> Self {
        Self { store, clock, settings }
    }

    /// Runs cycles until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.settings.cycle_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Sale scheduler started. Will run every {:?}",
            self.settings.cycle_period
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Error during sale cycle: {:#}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Sale scheduler received shutdown signal. Stopping");
                        return;
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<Sale> {
        info!("Starting new sale cycle");

        // Two sales must never be open at once, so a failed close skips this tick.
        let closed = self
            .store
            .deactivate_active_sales()
            .await
            .context("failed to deactivate active sales")?;
        info!("Deactivated {} previously active sales", closed);

        let now = self.clock.now();
        let sale = self
            .store
            .create_sale(NewSale {
                start_time: now,
                end_time: now + self.settings.sale_span(),
                total_items: self.settings.items_per_sale,
                sold_items: 0,
                is_active: true,
            })
            .await
            .context("failed to create sale")?;

        let items = generate_items(sale.id, self.settings.items_per_sale);
        if let Err(e) = self.store.create_items(items).await {
            error!("Failed to create items for sale {}: {}", sale.id, e);
            if let Err(deactivate_err) = self.store.deactivate_sale(sale.id).await {
                error!(
                    "Additionally failed to deactivate sale {} after item creation failure: {}",
                    sale.id, deactivate_err
                );
            }
            return Err(e).context(format!("failed to provision items for sale {}", sale.id));
        }

        info!(
            "Created sale {} with {} items, active from {} to {}",
            sale.id,
            sale.total_items,
            sale.start_time.to_rfc3339(),
            sale.end_time.to_rfc3339()
        );
        Ok(sale)
    }
}

pub fn generate_items(sale_id: SaleId, count: i32) -> Vec<NewItem> {
    let mut rng = rand::thread_rng();
    (1..=count)
        .map(|n| NewItem {
            sale_id,
            name: format!("Awesome Item #{}-{}", sale_id, n),
            image_url: format!(
                "https://example.com/image/{}/{}.png",
                sale_id,
                rng.gen_range(0..1000)
            ),
            is_sold: false,
        })
        .collect()
}
