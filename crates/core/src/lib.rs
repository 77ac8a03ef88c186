pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod pricing;

pub use auth::{AccessClaims, AuthError, IssuedToken, TokenService};
pub use domain::bill::{
    Bill, BillId, BillItem, BillNumber, BillOwner, BillStatus, GuestContact, NewBill,
};
pub use domain::cart::{
    Cart, CartId, CartItem, PromoSnapshot, MAX_CARTS_PER_USER, MAX_LINE_QUANTITY,
};
pub use domain::product::{Product, ProductId, UnitOfPrice};
pub use domain::promotion::{
    PromoType, Promotion, PromotionDraft, PromotionId, PromotionPatch, PromotionRule,
};
pub use domain::shop::{PromoStrategy, Schedule, Shop, ShopAddress, ShopId, ShopStatus, ShopType};
pub use domain::user::{Role, User, UserId, UserProfile};
pub use errors::{ApplicationError, DomainError, InterfaceError, ResourceKind};
pub use pricing::{DeterministicPromoEngine, PromoEngine, PromoResolution};
