//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ports::store::Document;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub price: Decimal,
    pub stock: u32,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category { pub id: String, pub name: String }

#[derive(Clone, Debug, PartialEq)]
pub struct NewProduct { pub name: String, pub category: Category, pub price: Decimal, pub stock: u32, pub description: String }

/// Full replacement of a product's catalog fields.
pub type ProductUpdate = NewProduct;

impl Product {
    pub fn create(new: NewProduct) -> Result<Self, ProductError> {
        validate(&new)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            category: new.category,
            price: new.price,
            stock: new.stock,
            description: new.description,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, update: ProductUpdate) -> Result<(), ProductError> {
        validate(&update)?;
        self.name = update.name;
        self.category = update.category;
        self.price = update.price;
        self.stock = update.stock;
        self.description = update.description;
        self.touch();
        Ok(())
    }

    pub fn has_stock(&self, quantity: u32) -> bool { self.stock >= quantity }

    /// Removes `quantity` units. Stock never goes below zero.
    pub fn remove_stock(&mut self, quantity: u32) -> Result<(), ProductError> {
        if quantity == 0 { return Err(ProductError::NonPositiveQuantity); }
        self.stock = self.stock.checked_sub(quantity).ok_or(ProductError::InsufficientStock { available: self.stock, requested: quantity })?;
        self.touch();
        Ok(())
    }

    pub fn set_stock(&mut self, stock: u32) { self.stock = stock; self.touch(); }

    pub fn matches(&self, query: &str, category_id: Option<&str>) -> bool {
        let query = query.trim().to_lowercase();
        let text_match = query.is_empty()
            || self.name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query);
        text_match && category_id.map_or(true, |id| self.category.id == id)
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn validate(product: &NewProduct) -> Result<(), ProductError> {
    if product.name.trim().is_empty() { return Err(ProductError::MissingName); }
    if product.category.id.trim().is_empty() { return Err(ProductError::MissingCategoryId); }
    if product.category.name.trim().is_empty() { return Err(ProductError::MissingCategoryName); }
    if product.price <= Decimal::ZERO { return Err(ProductError::NonPositivePrice); }
    Ok(())
}

impl Document for Product {
    const COLLECTION: &'static str = "products";
    const UNIQUE_FIELD: &'static str = "name";
    fn id(&self) -> &str { &self.id }
    fn unique_key(&self) -> Option<&str> { Some(&self.name) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("product name cannot be empty")]
    MissingName,
    #[error("product category id cannot be empty")]
    MissingCategoryId,
    #[error("product category name cannot be empty")]
    MissingCategoryName,
    #[error("product price must be positive")]
    NonPositivePrice,
    #[error("quantity must be greater than zero")]
    NonPositiveQuantity,
    #[error("not enough stock: available {available}, requested {requested}")]
    InsufficientStock { available: u32, requested: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, stock: u32) -> NewProduct {
        NewProduct {
            name: name.into(),
            category: Category { id: "C1".into(), name: "Books".into() },
            price: Decimal::new(1999, 2),
            stock,
            description: "A paperback".into(),
        }
    }

    #[test]
    fn test_product_create() {
        let p = Product::create(sample("Dune", 10)).unwrap();
        assert_eq!(p.name, "Dune");
        assert_eq!(p.stock, 10);
        assert!(!p.id.is_empty());
    }

    #[test]
    fn test_product_validation() {
        assert_eq!(Product::create(sample("", 1)), Err(ProductError::MissingName));
        let mut no_category = sample("Dune", 1);
        no_category.category.id.clear();
        assert_eq!(Product::create(no_category), Err(ProductError::MissingCategoryId));
        let mut free = sample("Dune", 1);
        free.price = Decimal::ZERO;
        assert_eq!(Product::create(free), Err(ProductError::NonPositivePrice));
    }

    #[test]
    fn test_inventory() {
        let mut p = Product::create(sample("Dune", 10)).unwrap();
        p.remove_stock(3).unwrap();
        assert_eq!(p.stock, 7);
        assert_eq!(p.remove_stock(8), Err(ProductError::InsufficientStock { available: 7, requested: 8 }));
        assert_eq!(p.stock, 7);
        assert_eq!(p.remove_stock(0), Err(ProductError::NonPositiveQuantity));
    }

    #[test]
    fn test_matches() {
        let p = Product::create(sample("Dune Messiah", 1)).unwrap();
        assert!(p.matches("messiah", None));
        assert!(p.matches("paperback", Some("C1")));
        assert!(!p.matches("dune", Some("C2")));
        assert!(p.matches("", None));
    }
}
