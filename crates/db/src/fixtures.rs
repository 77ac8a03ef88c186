use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;

use bazaar_core::domain::product::{Product, ProductId, UnitOfPrice};
use bazaar_core::domain::promotion::{PromotionDraft, PromotionRule};
use bazaar_core::domain::shop::{
    PromoStrategy, Schedule, Shop, ShopAddress, ShopId, ShopStatus, ShopType,
};
use bazaar_core::domain::user::UserId;

use crate::repositories::{
    ProductRepository, PromotionRepository, RepositoryError, ShopRepository,
};

/// Deterministic demo catalog: three shops in two cities, each with a
/// different promotion strategy, and overlapping promotions to exercise them.
pub struct DemoCatalog;

#[derive(Debug, Clone, Copy)]
struct ShopContract {
    id: i64,
    name: &'static str,
    shop_type: ShopType,
    category: &'static str,
    street: &'static str,
    city: &'static str,
    postal_code: &'static str,
    strategy: PromoStrategy,
    hours: HoursContract,
}

/// Weekly opening hours as `(hour, minute, second)`, UTC.
#[derive(Debug, Clone, Copy)]
struct HoursContract {
    days: &'static [Weekday],
    open: (u32, u32, u32),
    close: (u32, u32, u32),
}

const MON_TO_SAT: &[Weekday] =
    &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri, Weekday::Sat];
const EVERY_DAY: &[Weekday] = &[
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, Copy)]
struct ProductContract {
    id: i64,
    shop_id: i64,
    name: &'static str,
    description: &'static str,
    /// Price in cents.
    price_cents: i64,
    unit: UnitOfPrice,
}

#[derive(Debug, Clone, Copy)]
enum RuleContract {
    Percentage(i64),
    ForXGetY(u32, u32),
}

#[derive(Debug, Clone, Copy)]
struct PromotionContract {
    shop_id: i64,
    name: &'static str,
    rule: RuleContract,
    started_days_ago: i64,
    ends_in_days: i64,
    product_ids: &'static [i64],
}

const DEMO_OWNER: &str = "demo-owner";

const SHOPS: &[ShopContract] = &[
    ShopContract {
        id: 1,
        name: "Primeur Lumière",
        shop_type: ShopType::Physical,
        category: "Grocery",
        street: "12 Rue de la République",
        city: "Lyon",
        postal_code: "69002",
        strategy: PromoStrategy::BestForClient,
        hours: HoursContract { days: MON_TO_SAT, open: (7, 0, 0), close: (19, 30, 0) },
    },
    ShopContract {
        id: 2,
        name: "Boulangerie du Port",
        shop_type: ShopType::Both,
        category: "Bakery",
        street: "4 Quai du Port",
        city: "Marseille",
        postal_code: "13002",
        strategy: PromoStrategy::Cumulative,
        hours: HoursContract { days: EVERY_DAY, open: (5, 30, 0), close: (20, 0, 0) },
    },
    ShopContract {
        id: 3,
        name: "Épicerie Fine Bellecour",
        shop_type: ShopType::Online,
        category: "Delicatessen",
        street: "1 Place Bellecour",
        city: "Lyon",
        postal_code: "69002",
        strategy: PromoStrategy::MostRecent,
        // Online only: orders are taken around the clock.
        hours: HoursContract { days: EVERY_DAY, open: (0, 0, 0), close: (23, 59, 59) },
    },
];

const PRODUCTS: &[ProductContract] = &[
    ProductContract {
        id: 101,
        shop_id: 1,
        name: "Pommes Gala",
        description: "Crisp red apples from the Rhône valley",
        price_cents: 320,
        unit: UnitOfPrice::Kg,
    },
    ProductContract {
        id: 102,
        shop_id: 1,
        name: "Bananes bio",
        description: "Organic bananas",
        price_cents: 249,
        unit: UnitOfPrice::Kg,
    },
    ProductContract {
        id: 103,
        shop_id: 1,
        name: "Jus d'orange",
        description: "Fresh pressed orange juice, one litre bottle",
        price_cents: 450,
        unit: UnitOfPrice::Unit,
    },
    ProductContract {
        id: 201,
        shop_id: 2,
        name: "Baguette tradition",
        description: "Sourdough baguette baked every morning",
        price_cents: 120,
        unit: UnitOfPrice::Unit,
    },
    ProductContract {
        id: 202,
        shop_id: 2,
        name: "Croissant au beurre",
        description: "Butter croissant",
        price_cents: 110,
        unit: UnitOfPrice::Unit,
    },
    ProductContract {
        id: 301,
        shop_id: 3,
        name: "Huile d'olive",
        description: "Extra virgin olive oil from Provence",
        price_cents: 1490,
        unit: UnitOfPrice::L,
    },
    ProductContract {
        id: 302,
        shop_id: 3,
        name: "Comté 18 mois",
        description: "Aged comté cheese",
        price_cents: 2890,
        unit: UnitOfPrice::Kg,
    },
];

const PROMOTIONS: &[PromotionContract] = &[
    PromotionContract {
        shop_id: 1,
        name: "Semaine de la pomme",
        rule: RuleContract::Percentage(20),
        started_days_ago: 2,
        ends_in_days: 12,
        product_ids: &[101],
    },
    PromotionContract {
        shop_id: 1,
        name: "3 pour 2 fruits",
        rule: RuleContract::ForXGetY(2, 1),
        started_days_ago: 1,
        ends_in_days: 6,
        product_ids: &[101, 102],
    },
    PromotionContract {
        shop_id: 2,
        name: "Fidélité boulangerie",
        rule: RuleContract::Percentage(10),
        started_days_ago: 10,
        ends_in_days: 20,
        product_ids: &[201, 202],
    },
    PromotionContract {
        shop_id: 2,
        name: "Happy hour viennoiseries",
        rule: RuleContract::Percentage(10),
        started_days_ago: 1,
        ends_in_days: 1,
        product_ids: &[202],
    },
    PromotionContract {
        shop_id: 3,
        name: "Fromages d'automne",
        rule: RuleContract::Percentage(15),
        started_days_ago: 5,
        ends_in_days: 25,
        product_ids: &[302],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedResult {
    pub shops: usize,
    pub products: usize,
    pub promotions_created: usize,
    pub promotions_skipped: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

impl DemoCatalog {
    pub fn shop_count() -> usize {
        SHOPS.len()
    }

    pub fn product_count() -> usize {
        PRODUCTS.len()
    }

    /// Upserts shops and products; promotions are created once per (shop, name).
    pub async fn load(
        shops: &dyn ShopRepository,
        products: &dyn ProductRepository,
        promotions: &dyn PromotionRepository,
        now: DateTime<Utc>,
    ) -> Result<SeedResult, RepositoryError> {
        for contract in SHOPS {
            shops.save(contract.to_shop(now)).await?;
        }
        for contract in PRODUCTS {
            products.save(contract.to_product(now)).await?;
        }

        let mut created = 0;
        let mut skipped = 0;
        for contract in PROMOTIONS {
            let shop_id = ShopId(contract.shop_id);
            let existing = promotions.list_by_shop(shop_id).await?;
            if existing.iter().any(|promotion| promotion.name == contract.name) {
                skipped += 1;
                continue;
            }
            promotions.create(shop_id, contract.to_draft(now), now).await?;
            created += 1;
        }

        Ok(SeedResult {
            shops: SHOPS.len(),
            products: PRODUCTS.len(),
            promotions_created: created,
            promotions_skipped: skipped,
        })
    }

    pub async fn verify(
        shops: &dyn ShopRepository,
        products: &dyn ProductRepository,
        promotions: &dyn PromotionRepository,
    ) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();
        for contract in SHOPS {
            let present = shops.find_by_id(ShopId(contract.id)).await?.is_some();
            checks.push((format!("shop-{}", contract.id), present));

            let names: Vec<String> = promotions
                .list_by_shop(ShopId(contract.id))
                .await?
                .into_iter()
                .map(|promotion| promotion.name)
                .collect();
            let promotions_present = PROMOTIONS
                .iter()
                .filter(|promotion| promotion.shop_id == contract.id)
                .all(|promotion| names.iter().any(|name| name == promotion.name));
            checks.push((format!("shop-{}-promotions", contract.id), promotions_present));
        }
        for contract in PRODUCTS {
            let present = products.find_by_id(ProductId(contract.id)).await?.is_some();
            checks.push((format!("product-{}", contract.id), present));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

impl ShopContract {
    fn to_shop(self, now: DateTime<Utc>) -> Shop {
        Shop {
            id: ShopId(self.id),
            name: self.name.to_string(),
            owner_id: UserId(DEMO_OWNER.to_string()),
            status: ShopStatus::Open,
            shop_type: self.shop_type,
            category: Some(self.category.to_string()),
            address: Some(ShopAddress {
                street: self.street.to_string(),
                city: self.city.to_string(),
                postal_code: self.postal_code.to_string(),
                country: "France".to_string(),
            }),
            promo_strategy: self.strategy,
            schedule: self.hours.schedule(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl HoursContract {
    fn schedule(self) -> Vec<Schedule> {
        let at = |(hour, minute, second): (u32, u32, u32)| {
            NaiveTime::from_hms_opt(hour, minute, second).unwrap_or(NaiveTime::MIN)
        };
        self.days.iter().map(|day| Schedule::open(*day, at(self.open), at(self.close))).collect()
    }
}

impl ProductContract {
    fn to_product(self, now: DateTime<Utc>) -> Product {
        Product {
            id: ProductId(self.id),
            shop_id: ShopId(self.shop_id),
            name: self.name.to_string(),
            description: self.description.to_string(),
            sell_price: Decimal::new(self.price_cents, 2),
            unit_of_price: self.unit,
            barcode: None,
            promotions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl PromotionContract {
    fn to_draft(self, now: DateTime<Utc>) -> PromotionDraft {
        let rule = match self.rule {
            RuleContract::Percentage(pct) => {
                PromotionRule::Percentage { discount_pct: Decimal::from(pct) }
            }
            RuleContract::ForXGetY(buy_quantity, get_quantity) => {
                PromotionRule::ForXGetY { buy_quantity, get_quantity }
            }
        };
        PromotionDraft {
            name: self.name.to_string(),
            description: None,
            rule,
            start_date: now - Duration::days(self.started_days_ago),
            end_date: now + Duration::days(self.ends_in_days),
            is_active: true,
            product_ids: self.product_ids.iter().copied().map(ProductId).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use bazaar_core::domain::product::ProductId;
    use bazaar_core::pricing::{DeterministicPromoEngine, PromoEngine};
    use bazaar_core::domain::shop::ShopId;

    use super::DemoCatalog;
    use crate::repositories::{
        ProductRepository, ShopRepository, SqlProductRepository, SqlPromotionRepository,
        SqlShopRepository,
    };
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seeding_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let shops = SqlShopRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let promotions = SqlPromotionRepository::new(pool);
        let now = Utc::now();

        let first = DemoCatalog::load(&shops, &products, &promotions, now).await.expect("seed");
        assert_eq!(first.shops, DemoCatalog::shop_count());
        assert_eq!(first.products, DemoCatalog::product_count());
        assert_eq!(first.promotions_skipped, 0);

        let second = DemoCatalog::load(&shops, &products, &promotions, now).await.expect("reseed");
        assert_eq!(second.promotions_created, 0);
        assert_eq!(second.promotions_skipped, first.promotions_created);

        let verification =
            DemoCatalog::verify(&shops, &products, &promotions).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);
    }

    #[tokio::test]
    async fn seeded_apples_resolve_to_the_better_of_two_promotions() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let shops = SqlShopRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let promotions = SqlPromotionRepository::new(pool);
        let now = Utc::now();
        DemoCatalog::load(&shops, &products, &promotions, now).await.expect("seed");

        let apples = ProductRepository::find_by_id(&products, ProductId(101))
            .await
            .expect("find")
            .expect("apples");
        let shop = ShopRepository::find_by_id(&shops, ShopId(1)).await.expect("find").expect("shop");
        assert_eq!(apples.promotions.len(), 2);

        // 3 kg: 20% off gives 7.68, 3-for-2 gives 6.40.
        let resolution = DeterministicPromoEngine.resolve(&apples, 3, shop.promo_strategy, now);
        assert_eq!(resolution.final_price.to_string(), "6.40");
        assert_eq!(
            resolution.applied.map(|promotion| promotion.name),
            Some("3 pour 2 fruits".to_string())
        );
    }
}
