// Raw rows backing the admin sales report.

use anyhow::{Context, Result};
use rusqlite::Row;

use super::Database;
use crate::model::Role;

/// A payment joined with the roles of everyone who could be credited for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentAttributionRow {
    pub payment_id: i64,
    pub amount: i64,
    pub payer: (i64, String, Role),
    pub target: Option<(i64, String, Role)>,
    pub initiator: Option<(i64, String, Role)>,
}

fn party(row: &Row<'_>, id: usize) -> rusqlite::Result<Option<(i64, String, Role)>> {
    let user_id: Option<i64> = row.get(id)?;
    match user_id {
        Some(user_id) => Ok(Some((user_id, row.get(id + 1)?, row.get(id + 2)?))),
        None => Ok(None),
    }
}

impl Database {
    pub fn payment_attribution_rows(&self) -> Result<Vec<PaymentAttributionRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT p.initial_payment_id, p.amount,
                        payer.id, payer.username, payer.role_id,
                        target.id, target.username, target.role_id,
                        init.id, init.username, init.role_id
                 FROM initial_payments p
                 JOIN users payer ON payer.id = p.user_id
                 LEFT JOIN requests r ON r.request_id = p.request_id
                 LEFT JOIN users target ON target.id = r.target_user_id
                 LEFT JOIN users init ON init.id = r.user_id
                 ORDER BY p.initial_payment_id",
            )
            .context("failed to prepare attribution query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PaymentAttributionRow {
                    payment_id: row.get(0)?,
                    amount: row.get(1)?,
                    payer: (row.get(2)?, row.get(3)?, row.get(4)?),
                    target: party(row, 5)?,
                    initiator: party(row, 8)?,
                })
            })
            .context("failed to query attribution rows")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map attribution rows")?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::posts::tests::seed_post;
    use crate::db::requests::tests::seed_request;
    use crate::db::tests::{seed_user, test_db};

    #[test]
    fn rows_carry_all_parties() {
        let db = test_db();
        let client = seed_user(&db, "client", Role::Client);
        let shop = seed_user(&db, "shop", Role::PrintingShop);
        let post = seed_post(&db, shop.id, "Flyers", &[]);
        seed_request(&db, post, client.id, shop.id, 2_000);

        let rows = db.payment_attribution_rows().unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.amount, 2_000);
        assert_eq!(row.payer.2, Role::Client);
        assert_eq!(row.target.as_ref().map(|t| t.2), Some(Role::PrintingShop));
        assert_eq!(row.initiator.as_ref().map(|i| i.0), Some(client.id));
    }
}
