//! Aggregates module
pub mod order;
pub mod product;
pub mod user;

pub use order::{NewOrder, Order, OrderError, OrderItem, OrderStatus, OrderUpdate};
pub use product::{Category, NewProduct, Product, ProductError, ProductUpdate};
pub use user::{NewUser, User, UserError, UserStatus, UserUpdate};
