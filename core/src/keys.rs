//! Key factories for the namespaces the dashboards query.
//!
//! Every factory builds on its namespace's `all()` key so that invalidating
//! the namespace reaches every key it produces.

use crate::key::QueryKey;
use serde_json::Value;

pub mod dashboard {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("dashboard")
    }

    pub fn stats(role: &str) -> QueryKey {
        all().child("stats").child(role)
    }

    pub fn activity(franchise_id: &str) -> QueryKey {
        all().child("activity").child(franchise_id)
    }
}

pub mod orders {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("orders")
    }

    pub fn lists() -> QueryKey {
        all().child("list")
    }

    pub fn list(filters: Value) -> QueryKey {
        lists().child(filters)
    }

    pub fn detail(order_id: &str) -> QueryKey {
        all().child("detail").child(order_id)
    }
}

pub mod products {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("products")
    }

    pub fn list(filters: Value) -> QueryKey {
        all().child("list").child(filters)
    }

    pub fn detail(product_id: &str) -> QueryKey {
        all().child("detail").child(product_id)
    }

    pub fn inventory() -> QueryKey {
        all().child("inventory")
    }

    pub fn inventory_for(location_id: &str) -> QueryKey {
        inventory().child(location_id)
    }
}

pub mod cart {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("cart")
    }

    pub fn items(user_id: &str) -> QueryKey {
        all().child("items").child(user_id)
    }
}

pub mod franchises {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("franchises")
    }

    pub fn list(filters: Value) -> QueryKey {
        all().child("list").child(filters)
    }

    pub fn detail(franchise_id: &str) -> QueryKey {
        all().child("detail").child(franchise_id)
    }

    pub fn performance(franchise_id: &str) -> QueryKey {
        all().child("performance").child(franchise_id)
    }
}

pub mod analytics {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("analytics")
    }

    pub fn sales(range: &str) -> QueryKey {
        all().child("sales").child(range)
    }

    pub fn overview(franchise_id: &str) -> QueryKey {
        all().child("overview").child(franchise_id)
    }
}

pub mod notifications {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("notifications")
    }

    pub fn list(user_id: &str) -> QueryKey {
        all().child("list").child(user_id)
    }

    pub fn unread_count(user_id: &str) -> QueryKey {
        all().child("unread").child(user_id)
    }
}

pub mod user {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("user")
    }

    pub fn profile(user_id: &str) -> QueryKey {
        all().child("profile").child(user_id)
    }

    pub fn permissions(user_id: &str) -> QueryKey {
        all().child("permissions").child(user_id)
    }
}

pub mod suppliers {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("suppliers")
    }

    pub fn list(filters: Value) -> QueryKey {
        all().child("list").child(filters)
    }

    pub fn detail(supplier_id: &str) -> QueryKey {
        all().child("detail").child(supplier_id)
    }
}

pub mod inventory {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::from("inventory")
    }

    pub fn summary(location_id: &str) -> QueryKey {
        all().child("summary").child(location_id)
    }

    pub fn movements(location_id: &str) -> QueryKey {
        all().child("movements").child(location_id)
    }
}
