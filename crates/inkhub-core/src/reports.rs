// Admin sales report.

use std::collections::HashMap;

use serde::Serialize;

use crate::db::PaymentAttributionRow;
use crate::error::AppResult;
use crate::model::Role;
use crate::Marketplace;

const TOP_N: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserCounts {
    pub users: u64,
    pub graphic_designers: u64,
    pub printing_shops: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSales {
    pub user_id: i64,
    pub username: String,
    pub total_sales: i64,
}

/// All amounts in centavos.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SalesReport {
    pub total_sales: i64,
    pub highest_sale: i64,
    pub graphic_designer_sales: i64,
    pub printing_provider_sales: i64,
    pub user_counts: UserCounts,
    pub top_graphic_designers: Vec<ProviderSales>,
    pub top_printing_providers: Vec<ProviderSales>,
}

/// The provider credited with a payment: payer, then target, then initiator.
fn credited(row: &PaymentAttributionRow) -> Option<&(i64, String, Role)> {
    std::iter::once(Some(&row.payer))
        .chain([row.target.as_ref(), row.initiator.as_ref()])
        .flatten()
        .find(|(_, _, role)| role.is_provider())
}

fn top(totals: HashMap<i64, ProviderSales>) -> Vec<ProviderSales> {
    let mut ranked: Vec<_> = totals.into_values().collect();
    ranked.sort_by(|a, b| {
        b.total_sales
            .cmp(&a.total_sales)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    ranked.truncate(TOP_N);
    ranked
}

/// Aggregate payment rows. Each payment counts once toward at most one
/// provider bucket.
pub fn build_report(rows: &[PaymentAttributionRow], role_counts: &[(Role, u64)]) -> SalesReport {
    let mut report = SalesReport::default();
    let mut designers: HashMap<i64, ProviderSales> = HashMap::new();
    let mut shops: HashMap<i64, ProviderSales> = HashMap::new();

    for row in rows {
        report.total_sales = report.total_sales.saturating_add(row.amount);
        report.highest_sale = report.highest_sale.max(row.amount);

        let Some((user_id, username, role)) = credited(row) else {
            continue;
        };
        let (bucket, totals) = match role {
            Role::GraphicDesigner => (&mut report.graphic_designer_sales, &mut designers),
            Role::PrintingShop => (&mut report.printing_provider_sales, &mut shops),
            Role::Admin | Role::Client => continue,
        };
        *bucket = bucket.saturating_add(row.amount);
        let entry = totals.entry(*user_id).or_insert_with(|| ProviderSales {
            user_id: *user_id,
            username: username.clone(),
            total_sales: 0,
        });
        entry.total_sales = entry.total_sales.saturating_add(row.amount);
    }

    for (role, count) in role_counts {
        match role {
            Role::Client => report.user_counts.users = *count,
            Role::GraphicDesigner => report.user_counts.graphic_designers = *count,
            Role::PrintingShop => report.user_counts.printing_shops = *count,
            Role::Admin => {}
        }
    }
    report.top_graphic_designers = top(designers);
    report.top_printing_providers = top(shops);
    report
}

impl Marketplace {
    pub fn sales_report(&self) -> AppResult<SalesReport> {
        let rows = self.db.payment_attribution_rows()?;
        let counts = self.db.count_users_by_role()?;
        Ok(build_report(&rows, &counts))
    }
}
