use chrono::Utc;

use crate::commands::{prepare, CommandResult};
use bazaar_db::repositories::{SqlProductRepository, SqlPromotionRepository, SqlShopRepository};
use bazaar_db::{connect_with_settings, migrations, DemoCatalog, SeedResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let shops = SqlShopRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let promotions = SqlPromotionRepository::new(pool.clone());

        let seeded = DemoCatalog::load(&shops, &products, &promotions, Utc::now())
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoCatalog::verify(&shops, &products, &promotions)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let failed_checks = verification
            .checks
            .iter()
            .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
            .collect::<Vec<_>>();
        let outcome: Result<SeedResult, (&'static str, String, u8)> =
            if verification.all_present {
                Ok(seeded)
            } else {
                Err(("seed_verification", verification_message(&failed_checks), 6u8))
            };

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_message(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seed_message(seeded: &SeedResult) -> String {
    format!(
        "demo catalog loaded: {} shops, {} products, {} promotions ({} created, {} already present)",
        seeded.shops,
        seeded.products,
        seeded.promotions_created + seeded.promotions_skipped,
        seeded.promotions_created,
        seeded.promotions_skipped
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
