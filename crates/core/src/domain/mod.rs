pub mod bill;
pub mod cart;
pub mod product;
pub mod promotion;
pub mod shop;
pub mod user;
