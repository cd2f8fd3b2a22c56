use chrono::{DateTime, Utc};
use dlv_common::Money;
use log::{debug, trace};
use sqlx::{types::Json, QueryBuilder, SqliteConnection};

use crate::{
    db::{
        sqlite::{is_unique_violation, SqliteDatabaseError},
        traits::{Cancellation, InsertOrderResult},
    },
    db_types::{NewOrder, Order, OrderItem, OrderStatusType, PaymentMethod, PaymentStatus},
    dlv_api::order_objects::OrderQueryFilter,
};

/// Inserts the order unless the customer has already placed one with the same client reference, in which case the
/// existing order id is returned. Reusing a reference for a different order is an error.
pub async fn idempotent_insert(
    order: NewOrder,
    conn: &mut SqliteConnection,
) -> Result<InsertOrderResult, SqliteDatabaseError> {
    if let Some(reference) = &order.client_reference {
        if let Some(existing) = order_for_client_reference(order.customer_id, reference, conn).await? {
            let items = fetch_order_items(existing.id, conn).await?;
            if !is_same_placement(&existing, &items, &order) {
                return Err(SqliteDatabaseError::ClientReferenceReused(reference.clone()));
            }
            debug!("🗃️ Order with client reference {reference} already exists as #{}", existing.id);
            return Ok(InsertOrderResult::AlreadyExists(existing.id));
        }
    }
    let id = insert_order(order, conn).await?;
    Ok(InsertOrderResult::Inserted(id))
}

fn is_same_placement(existing: &Order, items: &[OrderItem], order: &NewOrder) -> bool {
    existing.restaurant_id == order.restaurant_id &&
        existing.subtotal == order.subtotal &&
        existing.delivery_fee == order.delivery_fee &&
        existing.tax == order.tax &&
        existing.payment_method == order.payment_method &&
        existing.promo_code == order.promo_code &&
        existing.delivery_address == order.delivery_address &&
        items.len() == order.items.len() &&
        items.iter().zip(&order.items).all(|(a, b)| {
            a.menu_item_id == b.menu_item_id && a.unit_price == b.unit_price && a.quantity == b.quantity
        })
}

/// Inserts a new order and its item lines. This is not atomic. Embed the call in a transaction and pass `&mut *tx` as
/// the connection argument.
async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<i64, SqliteDatabaseError> {
    let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_number,
                client_reference,
                customer_id,
                restaurant_id,
                subtotal,
                delivery_fee,
                discount,
                tax,
                total,
                delivery_address,
                payment_method,
                promo_code,
                placed_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            RETURNING id;
        "#,
    )
    .bind(&order.order_number)
    .bind(&order.client_reference)
    .bind(order.customer_id)
    .bind(order.restaurant_id)
    .bind(order.subtotal)
    .bind(order.delivery_fee)
    .bind(order.discount)
    .bind(order.tax)
    .bind(order.total)
    .bind(Json(&order.delivery_address))
    .bind(order.payment_method)
    .bind(&order.promo_code)
    .bind(order.placed_at)
    .fetch_one(&mut *conn)
    .await;
    let (id,) = match result {
        Err(e) if is_unique_violation(&e) => {
            return Err(SqliteDatabaseError::OrderNumberTaken(order.order_number))
        },
        r => r?,
    };
    for item in &order.items {
        sqlx::query(
            "INSERT INTO order_items (order_id, menu_item_id, name, unit_price, quantity) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(item.menu_item_id)
        .bind(&item.name)
        .bind(item.unit_price)
        .bind(item.quantity)
        .execute(&mut *conn)
        .await?;
    }
    trace!("🗃️ Order {} inserted with id {id} and {} items", order.order_number, order.items.len());
    Ok(id)
}

pub async fn order_for_client_reference(
    customer_id: i64,
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SqliteDatabaseError> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE customer_id = $1 AND client_reference = $2")
        .bind(customer_id)
        .bind(reference)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn order_number_exists(order_number: &str, conn: &mut SqliteConnection) -> Result<bool, SqliteDatabaseError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM orders WHERE order_number = $1")
        .bind(order_number)
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

pub async fn fetch_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, SqliteDatabaseError> {
    let order =
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_items(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderItem>, SqliteDatabaseError> {
    let items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(items)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`
///
/// Resulting orders are ordered by `placed_at` in ascending order
pub async fn fetch_orders(
    query: OrderQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::new("SELECT * FROM orders ");
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(id) = query.customer_id {
        where_clause.push("customer_id = ");
        where_clause.push_bind_unseparated(id);
    }
    if let Some(id) = query.restaurant_id {
        where_clause.push("restaurant_id = ");
        where_clause.push_bind_unseparated(id);
    }
    if let Some(id) = query.courier_id {
        where_clause.push("courier_id = ");
        where_clause.push_bind_unseparated(id);
    }
    if let Some(method) = query.payment_method {
        where_clause.push("payment_method = ");
        where_clause.push_bind_unseparated(method);
    }
    if let Some(since) = query.since {
        where_clause.push("julianday(placed_at) >= julianday(");
        where_clause.push_bind_unseparated(since);
        where_clause.push_unseparated(")");
    }
    if let Some(until) = query.until {
        where_clause.push("julianday(placed_at) <= julianday(");
        where_clause.push_bind_unseparated(until);
        where_clause.push_unseparated(")");
    }
    if let Some(statuses) = query.status.filter(|s| !s.is_empty()) {
        where_clause.push("status IN (");
        for (i, status) in statuses.into_iter().enumerate() {
            if i > 0 {
                where_clause.push_unseparated(", ");
            }
            where_clause.push_bind_unseparated(status);
        }
        where_clause.push_unseparated(")");
    }
    builder.push(" ORDER BY placed_at ASC, id ASC");

    trace!("🗃️ Executing query: {}", builder.sql());
    let orders = builder.build_query_as::<Order>().fetch_all(conn).await?;
    trace!("🗃️ Result of fetch_orders: {}", orders.len());
    Ok(orders)
}

/// Explains why a compare-and-set on an order matched no rows.
async fn stale_status_error(
    order_id: i64,
    expected: OrderStatusType,
    conn: &mut SqliteConnection,
) -> SqliteDatabaseError {
    match fetch_order(order_id, conn).await {
        Ok(Some(order)) => SqliteDatabaseError::StaleStatus { order_id, expected, actual: order.status },
        Ok(None) => SqliteDatabaseError::OrderNotFound(order_id),
        Err(e) => e,
    }
}

/// Compare-and-set of the order status. The timestamp column for `to` is stamped with `at`.
pub(crate) async fn update_order_status(
    order_id: i64,
    from: OrderStatusType,
    to: OrderStatusType,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, SqliteDatabaseError> {
    let column = to.timestamp_column();
    let sql = format!(
        "UPDATE orders SET status = $1, {column} = $2, updated_at = $2 WHERE id = $3 AND status = $4 RETURNING *"
    );
    let order = sqlx::query_as::<_, Order>(&sql)
        .bind(to)
        .bind(at)
        .bind(order_id)
        .bind(from)
        .fetch_optional(&mut *conn)
        .await?;
    match order {
        Some(order) => {
            trace!("🗃️ Order #{order_id} moved from {from} to {to}");
            Ok(order)
        },
        None => Err(stale_status_error(order_id, from, conn).await),
    }
}

/// `ready` → `delivering`. An unassigned order is assigned to the courier in the same statement.
pub(crate) async fn pick_up_order(
    order_id: i64,
    courier_id: i64,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, SqliteDatabaseError> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders SET
            status = 'delivering',
            courier_id = COALESCE(courier_id, $1),
            picked_up_at = $2,
            updated_at = $2
        WHERE id = $3 AND status = 'ready' AND (courier_id IS NULL OR courier_id = $1)
        RETURNING *
        "#,
    )
    .bind(courier_id)
    .bind(at)
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(order) = order {
        return Ok(order);
    }
    match fetch_order(order_id, conn).await? {
        None => Err(SqliteDatabaseError::OrderNotFound(order_id)),
        Some(o) if o.status != OrderStatusType::Ready => {
            Err(SqliteDatabaseError::StaleStatus { order_id, expected: OrderStatusType::Ready, actual: o.status })
        },
        Some(_) => Err(SqliteDatabaseError::AssignmentConflict(order_id, "another courier is assigned".into())),
    }
}

pub(crate) async fn cancel_order(
    order_id: i64,
    from: OrderStatusType,
    cancellation: &Cancellation,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, SqliteDatabaseError> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders SET
            status = 'cancelled',
            cancelled_at = $1,
            updated_at = $1,
            cancel_reason = $2,
            cancelled_by = $3
        WHERE id = $4 AND status = $5
        RETURNING *
        "#,
    )
    .bind(at)
    .bind(&cancellation.reason)
    .bind(cancellation.cancelled_by.to_string())
    .bind(order_id)
    .bind(from)
    .fetch_optional(&mut *conn)
    .await?;
    match order {
        Some(order) => Ok(order),
        None => Err(stale_status_error(order_id, from, conn).await),
    }
}

pub(crate) async fn set_payment_status(
    order_id: i64,
    status: PaymentStatus,
    reference: Option<&str>,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, SqliteDatabaseError> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders SET
            payment_status = $1,
            payment_reference = COALESCE($2, payment_reference),
            updated_at = $3
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(reference)
    .bind(at)
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    order.ok_or(SqliteDatabaseError::OrderNotFound(order_id))
}

pub(crate) async fn assign_courier(
    order_id: i64,
    courier_id: i64,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, SqliteDatabaseError> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders SET courier_id = $1, updated_at = $2
        WHERE id = $3 AND courier_id IS NULL AND status IN ('accepted', 'preparing', 'ready')
        RETURNING *
        "#,
    )
    .bind(courier_id)
    .bind(at)
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(order) = order {
        return Ok(order);
    }
    match fetch_order(order_id, conn).await? {
        None => Err(SqliteDatabaseError::OrderNotFound(order_id)),
        Some(o) if o.courier_id.is_some() => {
            Err(SqliteDatabaseError::AssignmentConflict(order_id, "a courier is already assigned".into()))
        },
        Some(o) => Err(SqliteDatabaseError::AssignmentConflict(order_id, format!("the order is {}", o.status))),
    }
}

pub(crate) async fn mark_restaurant_paid(
    order_id: i64,
    courier_id: i64,
    amount: Money,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, SqliteDatabaseError> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders SET restaurant_paid_by_courier = 1, restaurant_paid_amount = $1, updated_at = $2
        WHERE id = $3
            AND courier_id = $4
            AND payment_method = 'cash'
            AND status NOT IN ('delivered', 'cancelled')
        RETURNING *
        "#,
    )
    .bind(amount)
    .bind(at)
    .bind(order_id)
    .bind(courier_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(order) = order {
        return Ok(order);
    }
    match fetch_order(order_id, conn).await? {
        None => Err(SqliteDatabaseError::OrderNotFound(order_id)),
        Some(o) if o.payment_method != PaymentMethod::Cash => {
            Err(SqliteDatabaseError::PaymentStateConflict(format!("order #{order_id} is not a cash order")))
        },
        Some(o) if o.courier_id != Some(courier_id) => Err(SqliteDatabaseError::AssignmentConflict(
            order_id,
            format!("courier #{courier_id} is not assigned"),
        )),
        Some(o) => Err(SqliteDatabaseError::StaleStatus {
            order_id,
            expected: OrderStatusType::Delivering,
            actual: o.status,
        }),
    }
}

pub async fn stale_orders(
    status: OrderStatusType,
    placed_before: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SqliteDatabaseError> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE status = $1 AND julianday(placed_at) < julianday($2) ORDER BY placed_at, id",
    )
    .bind(status)
    .bind(placed_before)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

/// Delivered cash orders assigned to the courier that no remittance covers yet.
pub async fn cash_orders_pending_remittance(
    courier_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SqliteDatabaseError> {
    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders o
        WHERE o.courier_id = $1
            AND o.payment_method = 'cash'
            AND o.status = 'delivered'
            AND NOT EXISTS (SELECT 1 FROM remittance_orders r WHERE r.order_id = o.id)
        ORDER BY o.delivered_at, o.id
        "#,
    )
    .bind(courier_id)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}
