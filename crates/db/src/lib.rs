pub mod cart;
pub mod connection;
pub mod fixtures;
pub mod identity;
pub mod kv;
pub mod migrations;
pub mod redis_store;
pub mod repositories;

pub use cart::{CartError, CartStore, CheckoutBill, CheckoutReceipt, CART_TTL};
pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use fixtures::{DemoCatalog, SeedResult, VerificationResult};
pub use identity::{IdentityError, IdentityProvider, LocalIdentityProvider};
pub use kv::{InMemoryKeyValueStore, KeyValueStore, StoreError};
pub use redis_store::RedisKeyValueStore;
