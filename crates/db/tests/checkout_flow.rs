use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use bazaar_core::domain::bill::BillStatus;
use bazaar_core::domain::product::ProductId;
use bazaar_core::domain::shop::ShopId;
use bazaar_core::pricing::DeterministicPromoEngine;
use bazaar_db::repositories::{
    BillRepository, ShopRepository, SqlBillRepository, SqlProductRepository, SqlPromotionRepository,
    SqlShopRepository,
};
use bazaar_db::{connect_with_settings, migrations, CartStore, DemoCatalog, InMemoryKeyValueStore};

type FlowTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

struct Harness {
    carts: CartStore,
    shops: Arc<SqlShopRepository>,
    bills: Arc<SqlBillRepository>,
}

async fn harness() -> FlowTestResult<Harness> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;

    let shops = Arc::new(SqlShopRepository::new(pool.clone()));
    let products = Arc::new(SqlProductRepository::new(pool.clone()));
    let promotions = SqlPromotionRepository::new(pool.clone());
    let bills = Arc::new(SqlBillRepository::new(pool));
    DemoCatalog::load(shops.as_ref(), products.as_ref(), &promotions, Utc::now())
        .await
        .map_err(|error| format!("seed: {error}"))?;

    let carts = CartStore::new(
        Arc::new(InMemoryKeyValueStore::new()),
        shops.clone(),
        products,
        bills.clone(),
        Arc::new(DeterministicPromoEngine),
    );
    Ok(Harness { carts, shops, bills })
}

#[tokio::test]
async fn multi_shop_cart_checks_out_into_durable_bills() -> FlowTestResult {
    let h = harness().await?;
    let cart = h.carts.create_cart("user-7", "Market day").await.map_err(|e| e.to_string())?;

    h.carts.add_item("user-7", &cart.id, ProductId(101), 3).await.map_err(|e| e.to_string())?;
    h.carts.add_item("user-7", &cart.id, ProductId(201), 2).await.map_err(|e| e.to_string())?;
    let priced = h
        .carts
        .add_item("user-7", &cart.id, ProductId(202), 1)
        .await
        .map_err(|e| e.to_string())?;

    // Cumulative bakery: two 10% promotions stack on the croissant.
    let croissant = priced.item(ProductId(202)).ok_or("croissant line missing")?;
    require_eq!(croissant.final_price, Decimal::new(8910, 4));
    require!(croissant.promo.is_empty(), "cumulative lines carry no single promotion");

    let receipt = h.carts.checkout("user-7", &cart.id, None).await.map_err(|e| e.to_string())?;
    require_eq!(receipt.bills.len(), 2);

    for (shop, expected_items) in [(ShopId(1), 1_usize), (ShopId(2), 2_usize)] {
        let pending = h
            .bills
            .list_by_status(shop, BillStatus::Pending)
            .await
            .map_err(|e| e.to_string())?;
        require_eq!(pending.len(), 1);
        require_eq!(pending[0].items.len(), expected_items);
        require!(
            pending[0].number.as_str().starts_with("BILL-"),
            "unexpected bill number {}",
            pending[0].number
        );
    }

    require!(h.carts.get_cart("user-7", &cart.id).await.is_err(), "cart should be deleted");
    Ok(())
}

#[tokio::test]
async fn failed_checkout_stores_no_bills_and_keeps_the_cart() -> FlowTestResult {
    let h = harness().await?;
    let cart = h.carts.create_cart("user-8", "Split").await.map_err(|e| e.to_string())?;
    h.carts.add_item("user-8", &cart.id, ProductId(101), 1).await.map_err(|e| e.to_string())?;
    h.carts.add_item("user-8", &cart.id, ProductId(202), 1).await.map_err(|e| e.to_string())?;

    // The bakery closes down after the lines were priced; its bill cannot be written.
    require!(h.shops.delete(ShopId(2)).await.map_err(|e| e.to_string())?, "shop 2 deleted");

    require!(h.carts.checkout("user-8", &cart.id, None).await.is_err(), "checkout must fail");
    let shop_one = h.bills.list_by_shop(ShopId(1)).await.map_err(|e| e.to_string())?;
    require!(shop_one.is_empty(), "no partial bill for shop 1, found {}", shop_one.len());
    require!(h.carts.get_cart("user-8", &cart.id).await.is_ok(), "cart should survive");

    h.carts.remove_item("user-8", &cart.id, ProductId(202)).await.map_err(|e| e.to_string())?;
    let receipt = h.carts.checkout("user-8", &cart.id, None).await.map_err(|e| e.to_string())?;
    require_eq!(receipt.bills.len(), 1);
    require_eq!(h.bills.list_by_shop(ShopId(1)).await.map_err(|e| e.to_string())?.len(), 1);
    Ok(())
}
