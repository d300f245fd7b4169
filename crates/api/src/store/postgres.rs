//! PostgreSQL ticket store
//!
//! Enum-like columns are VARCHAR; rows are read into string-typed row
//! structs and parsed into the domain enums on the way out.

use super::{
    NewInternalNote, NewMessage, NewNotification, NewRating, NewTicket, NewTicketEvent,
    NotificationQuery, StatsUpdate, TicketChange, TicketQuery, TicketScope, TicketStore,
};
use async_trait::async_trait;
use helpdesk_shared::{
    ClientProfile, InternalNote, Message, Notification, OperatorStats, StoreError, StoreResult,
    Ticket, TicketCategory, TicketEvent, TicketRating, TicketSummary, User,
};
use sqlx::{FromRow, PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Column Lists
// =============================================================================

const TICKET_COLUMNS: &str = r#"
    tickets.id, tickets.number, tickets.title, tickets.description,
    tickets.category, tickets.status, tickets.priority,
    tickets.client_id, tickets.operator_id, tickets.context_data,
    ARRAY(SELECT file_id FROM ticket_attachments ta WHERE ta.ticket_id = tickets.id) AS attachment_ids,
    tickets.created_at, tickets.updated_at, tickets.assigned_at,
    tickets.resolved_at, tickets.closed_at
"#;

const MESSAGE_COLUMNS: &str = r#"
    messages.id, messages.ticket_id, messages.author_id, messages.content,
    messages.is_internal,
    ARRAY(SELECT file_id FROM message_attachments ma WHERE ma.message_id = messages.id) AS attachment_ids,
    messages.created_at, messages.read_at
"#;

const NOTIFICATION_COLUMNS: &str = r#"
    id, user_id, notification_type, title, message, entity_id, entity_type,
    is_read, read_at, created_at
"#;

const PRIORITY_RANK: &str = r#"
    CASE tickets.priority
        WHEN 'CRITICAL' THEN 3
        WHEN 'HIGH' THEN 2
        WHEN 'MEDIUM' THEN 1
        ELSE 0
    END
"#;

/// Shared WHERE clause for ticket listing; binds $1..$8
const TICKET_LIST_FILTER: &str = r#"
    ($1::uuid IS NULL OR tickets.client_id = $1)
    AND ($2::uuid IS NULL OR tickets.operator_id = $2
         OR (tickets.operator_id IS NULL AND tickets.status = 'NEW'))
    AND (cardinality($3::text[]) = 0 OR tickets.status = ANY($3))
    AND (cardinality($4::text[]) = 0 OR tickets.priority = ANY($4))
    AND (cardinality($5::text[]) = 0 OR tickets.category = ANY($5))
    AND ($6::text IS NULL
         OR tickets.title ILIKE $6 OR tickets.description ILIKE $6 OR tickets.number ILIKE $6)
    AND ($7::timestamptz IS NULL OR tickets.created_at >= $7)
    AND ($8::timestamptz IS NULL OR tickets.created_at <= $8)
"#;

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
    is_active: bool,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            role: row.role.parse()?,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, FromRow)]
struct TicketRow {
    id: Uuid,
    number: String,
    title: String,
    description: String,
    category: String,
    status: String,
    priority: String,
    client_id: Uuid,
    operator_id: Option<Uuid>,
    context_data: Option<serde_json::Value>,
    attachment_ids: Vec<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    assigned_at: Option<OffsetDateTime>,
    resolved_at: Option<OffsetDateTime>,
    closed_at: Option<OffsetDateTime>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            number: row.number,
            title: row.title,
            description: row.description,
            category: row.category.parse()?,
            status: row.status.parse()?,
            priority: row.priority.parse()?,
            client_id: row.client_id,
            operator_id: row.operator_id,
            context_data: row.context_data,
            attachment_ids: row.attachment_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
            assigned_at: row.assigned_at,
            resolved_at: row.resolved_at,
            closed_at: row.closed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TicketSummaryRow {
    #[sqlx(flatten)]
    ticket: TicketRow,
    unread_count: i64,
}

impl TryFrom<TicketSummaryRow> for TicketSummary {
    type Error = StoreError;

    fn try_from(row: TicketSummaryRow) -> Result<Self, Self::Error> {
        Ok(TicketSummary {
            ticket: row.ticket.try_into()?,
            unread_count: row.unread_count,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    ticket_id: Uuid,
    event_type: String,
    description: String,
    user_id: Uuid,
    metadata: Option<serde_json::Value>,
    created_at: OffsetDateTime,
}

impl TryFrom<EventRow> for TicketEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(TicketEvent {
            id: row.id,
            ticket_id: row.ticket_id,
            event_type: row.event_type.parse()?,
            description: row.description,
            user_id: row.user_id,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    ticket_id: Uuid,
    author_id: Uuid,
    content: String,
    is_internal: bool,
    attachment_ids: Vec<Uuid>,
    created_at: OffsetDateTime,
    read_at: Option<OffsetDateTime>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            ticket_id: row.ticket_id,
            author_id: row.author_id,
            content: row.content,
            is_internal: row.is_internal,
            attachment_ids: row.attachment_ids,
            created_at: row.created_at,
            read_at: row.read_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    notification_type: String,
    title: String,
    message: String,
    entity_id: Option<Uuid>,
    entity_type: Option<String>,
    is_read: bool,
    read_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            notification_type: row.notification_type.parse()?,
            title: row.title,
            message: row.message,
            entity_id: row.entity_id,
            entity_type: row.entity_type.map(|kind| kind.parse()).transpose()?,
            is_read: row.is_read,
            read_at: row.read_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OperatorStatsRow {
    user_id: Uuid,
    total_resolved: i32,
    average_resolution_time: i32,
    total_ratings: i32,
    average_rating: f64,
}

#[derive(Debug, FromRow)]
struct RatingRow {
    id: Uuid,
    ticket_id: Uuid,
    client_id: Uuid,
    rating: i16,
    feedback: Option<String>,
    liked_speed: bool,
    liked_clarity: bool,
    liked_politeness: bool,
    liked_completeness: bool,
    created_at: OffsetDateTime,
}

impl From<RatingRow> for TicketRating {
    fn from(row: RatingRow) -> Self {
        TicketRating {
            id: row.id,
            ticket_id: row.ticket_id,
            client_id: row.client_id,
            rating: row.rating,
            feedback: row.feedback,
            liked_speed: row.liked_speed,
            liked_clarity: row.liked_clarity,
            liked_politeness: row.liked_politeness,
            liked_completeness: row.liked_completeness,
            created_at: row.created_at,
        }
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// `%term%` with LIKE metacharacters escaped
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

// =============================================================================
// Transaction Helpers
// =============================================================================

async fn fetch_ticket(conn: &mut PgConnection, id: Uuid) -> StoreResult<Option<Ticket>> {
    let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE tickets.id = $1");
    let row: Option<TicketRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Ticket::try_from).transpose()
}

async fn insert_event(
    conn: &mut PgConnection,
    event: &NewTicketEvent,
    at: OffsetDateTime,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ticket_events (id, ticket_id, event_type, description, user_id, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(event.ticket_id)
    .bind(event.event_type.as_str())
    .bind(&event.description)
    .bind(event.user_id)
    .bind(&event.metadata)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn apply_stats(conn: &mut PgConnection, stats: &[StatsUpdate]) -> StoreResult<()> {
    for update in stats {
        match *update {
            StatsUpdate::ClientTicketOpened { client_id } => {
                sqlx::query(
                    r#"
                    INSERT INTO client_profiles (user_id, total_tickets) VALUES ($1, 1)
                    ON CONFLICT (user_id)
                    DO UPDATE SET total_tickets = client_profiles.total_tickets + 1
                    "#,
                )
                .bind(client_id)
                .execute(&mut *conn)
                .await?;
            }
            StatsUpdate::ClientTicketResolved { client_id } => {
                sqlx::query(
                    r#"
                    INSERT INTO client_profiles (user_id, resolved_tickets) VALUES ($1, 1)
                    ON CONFLICT (user_id)
                    DO UPDATE SET resolved_tickets = client_profiles.resolved_tickets + 1
                    "#,
                )
                .bind(client_id)
                .execute(&mut *conn)
                .await?;
            }
            StatsUpdate::OperatorResolved { operator_id, minutes } => {
                // Resolution samples are never negative, so integer division floors
                sqlx::query(
                    r#"
                    INSERT INTO operator_stats (user_id, total_resolved, average_resolution_time)
                    VALUES ($1, 1, $2)
                    ON CONFLICT (user_id) DO UPDATE SET
                        average_resolution_time = (
                            (operator_stats.average_resolution_time::bigint * operator_stats.total_resolved + $2)
                            / (operator_stats.total_resolved + 1)
                        )::int,
                        total_resolved = operator_stats.total_resolved + 1
                    "#,
                )
                .bind(operator_id)
                .bind(minutes.max(0))
                .execute(&mut *conn)
                .await?;
            }
            StatsUpdate::OperatorRated { operator_id, rating } => {
                sqlx::query(
                    r#"
                    INSERT INTO operator_stats (user_id, total_ratings, average_rating)
                    VALUES ($1, 1, $2)
                    ON CONFLICT (user_id) DO UPDATE SET
                        average_rating = (operator_stats.average_rating * operator_stats.total_ratings + $2)
                            / (operator_stats.total_ratings + 1),
                        total_ratings = operator_stats.total_ratings + 1
                    "#,
                )
                .bind(operator_id)
                .bind(f64::from(rating))
                .execute(&mut *conn)
                .await?;
            }
        }
    }
    Ok(())
}

// =============================================================================
// Adapter
// =============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TicketStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(helpdesk_shared::ping(&self.pool).await?)
    }

    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, first_name, last_name, role, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                role = EXCLUDED.role,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, first_name, last_name, role, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_active_operator_class(&self) -> StoreResult<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, first_name, last_name, role, is_active
            FROM users
            WHERE is_active = TRUE AND role IN ('OPERATOR', 'SPECIALIST', 'MANAGER')
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn operator_stats(&self, user_id: Uuid) -> StoreResult<Option<OperatorStats>> {
        let row: Option<OperatorStatsRow> = sqlx::query_as(
            r#"
            SELECT user_id, total_resolved, average_resolution_time, total_ratings, average_rating
            FROM operator_stats WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| OperatorStats {
            user_id: r.user_id,
            total_resolved: r.total_resolved,
            average_resolution_time: r.average_resolution_time,
            total_ratings: r.total_ratings,
            average_rating: r.average_rating,
        }))
    }

    async fn client_profile(&self, user_id: Uuid) -> StoreResult<Option<ClientProfile>> {
        let row: Option<(Uuid, i32, i32)> = sqlx::query_as(
            "SELECT user_id, total_tickets, resolved_tickets FROM client_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, total_tickets, resolved_tickets)| ClientProfile {
            user_id,
            total_tickets,
            resolved_tickets,
        }))
    }

    async fn create_ticket(
        &self,
        ticket: NewTicket,
        event: NewTicketEvent,
        stats: &[StatsUpdate],
    ) -> StoreResult<Ticket> {
        let mut tx = self.pool.begin().await?;

        let (sequence,): (i64,) = sqlx::query_as("SELECT nextval('ticket_number_seq')")
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO tickets (id, number, title, description, category, status, priority,
                                 client_id, context_data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'NEW', $6, $7, $8, $9, $9)
            "#,
        )
        .bind(ticket.id)
        .bind(Ticket::format_number(sequence))
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.category.as_str())
        .bind(ticket.priority.as_str())
        .bind(ticket.client_id)
        .bind(&ticket.context_data)
        .bind(ticket.created_at)
        .execute(&mut *tx)
        .await?;

        if !ticket.attachment_ids.is_empty() {
            sqlx::query(
                "INSERT INTO ticket_attachments (ticket_id, file_id) SELECT DISTINCT $1::uuid, UNNEST($2::uuid[])",
            )
            .bind(ticket.id)
            .bind(&ticket.attachment_ids)
            .execute(&mut *tx)
            .await?;
        }

        insert_event(&mut tx, &event, ticket.created_at).await?;
        apply_stats(&mut tx, stats).await?;

        let created = fetch_ticket(&mut tx, ticket.id)
            .await?
            .ok_or_else(|| StoreError::Database("inserted ticket vanished".into()))?;
        tx.commit().await?;
        Ok(created)
    }

    async fn find_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let mut conn = self.pool.acquire().await?;
        fetch_ticket(&mut conn, id).await
    }

    async fn update_ticket(
        &self,
        id: Uuid,
        change: TicketChange,
        event: Option<NewTicketEvent>,
        stats: &[StatsUpdate],
    ) -> StoreResult<Option<Ticket>> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent transitions on the same ticket
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM tickets WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(None);
        };
        if let Some(expected) = change.expected_status {
            if current != expected.as_str() {
                tx.rollback().await?;
                return Err(StoreError::Stale(format!(
                    "ticket {} is {}, expected {}",
                    id, current, expected
                )));
            }
        }

        sqlx::query(
            r#"
            UPDATE tickets SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                category = COALESCE($4, category),
                context_data = COALESCE($5, context_data),
                status = COALESCE($6, status),
                priority = COALESCE($7, priority),
                operator_id = COALESCE($8, operator_id),
                assigned_at = COALESCE($9, assigned_at),
                resolved_at = COALESCE($10, resolved_at),
                closed_at = COALESCE($11, closed_at),
                updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&change.title)
        .bind(&change.description)
        .bind(change.category.map(|c| c.as_str()))
        .bind(&change.context_data)
        .bind(change.status.map(|s| s.as_str()))
        .bind(change.priority.map(|p| p.as_str()))
        .bind(change.operator_id)
        .bind(change.assigned_at)
        .bind(change.resolved_at)
        .bind(change.closed_at)
        .bind(change.updated_at)
        .execute(&mut *tx)
        .await?;

        if let Some(event) = &event {
            insert_event(&mut tx, event, change.updated_at).await?;
        }
        apply_stats(&mut tx, stats).await?;

        let updated = fetch_ticket(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn list_tickets(&self, query: &TicketQuery) -> StoreResult<(Vec<TicketSummary>, i64)> {
        let (client_scope, operator_scope) = match query.scope {
            TicketScope::All => (None, None),
            TicketScope::Client(id) => (Some(id), None),
            TicketScope::Operator(id) => (None, Some(id)),
        };
        let statuses: Vec<String> = query.filter.statuses.iter().map(|s| s.to_string()).collect();
        let priorities: Vec<String> = query.filter.priorities.iter().map(|p| p.to_string()).collect();
        let categories: Vec<String> = query.filter.categories.iter().map(|c| c.to_string()).collect();
        let search = query.filter.search.as_deref().map(like_pattern);

        let count_sql = format!("SELECT COUNT(*) FROM tickets WHERE {TICKET_LIST_FILTER}");
        let (total,): (i64,) = sqlx::query_as(&count_sql)
            .bind(client_scope)
            .bind(operator_scope)
            .bind(&statuses)
            .bind(&priorities)
            .bind(&categories)
            .bind(&search)
            .bind(query.filter.created_from)
            .bind(query.filter.created_to)
            .fetch_one(&self.pool)
            .await?;

        let page_sql = format!(
            r#"
            SELECT {TICKET_COLUMNS},
                (SELECT COUNT(*) FROM messages m
                 WHERE m.ticket_id = tickets.id AND m.is_internal = FALSE
                   AND m.read_at IS NULL AND m.author_id <> $9) AS unread_count
            FROM tickets
            WHERE {TICKET_LIST_FILTER}
            ORDER BY {PRIORITY_RANK} DESC, tickets.created_at DESC, tickets.id
            LIMIT $10 OFFSET $11
            "#
        );
        let rows: Vec<TicketSummaryRow> = sqlx::query_as(&page_sql)
            .bind(client_scope)
            .bind(operator_scope)
            .bind(&statuses)
            .bind(&priorities)
            .bind(&categories)
            .bind(&search)
            .bind(query.filter.created_from)
            .bind(query.filter.created_to)
            .bind(query.viewer_id)
            .bind(i64::from(query.page.limit))
            .bind(query.page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((collect(rows)?, total))
    }

    async fn ticket_queue(&self) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            r#"
            SELECT {TICKET_COLUMNS} FROM tickets
            WHERE tickets.operator_id IS NULL AND tickets.status = 'NEW'
            ORDER BY {PRIORITY_RANK} DESC, tickets.created_at ASC, tickets.id
            "#
        );
        let rows: Vec<TicketRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        collect(rows)
    }

    async fn active_tickets_for(&self, operator_id: Uuid) -> StoreResult<Vec<TicketSummary>> {
        let sql = format!(
            r#"
            SELECT {TICKET_COLUMNS},
                (SELECT COUNT(*) FROM messages m
                 WHERE m.ticket_id = tickets.id AND m.is_internal = FALSE
                   AND m.read_at IS NULL AND m.author_id <> $1) AS unread_count
            FROM tickets
            WHERE tickets.operator_id = $1
              AND tickets.status IN ('NEW', 'IN_PROGRESS', 'WAITING')
            ORDER BY {PRIORITY_RANK} DESC, tickets.updated_at DESC, tickets.id
            "#
        );
        let rows: Vec<TicketSummaryRow> = sqlx::query_as(&sql)
            .bind(operator_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn similar_resolved(
        &self,
        category: TicketCategory,
        exclude: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            r#"
            SELECT {TICKET_COLUMNS} FROM tickets
            WHERE tickets.category = $1 AND tickets.status = 'RESOLVED' AND tickets.id <> $2
            ORDER BY tickets.resolved_at DESC NULLS LAST
            LIMIT $3
            "#
        );
        let rows: Vec<TicketRow> = sqlx::query_as(&sql)
            .bind(category.as_str())
            .bind(exclude)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn ticket_events(&self, ticket_id: Uuid) -> StoreResult<Vec<TicketEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, ticket_id, event_type, description, user_id, metadata, created_at
            FROM ticket_events WHERE ticket_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn insert_internal_note(
        &self,
        note: NewInternalNote,
        event: NewTicketEvent,
    ) -> StoreResult<InternalNote> {
        let mut tx = self.pool.begin().await?;
        let (id, ticket_id, author_id, content, created_at): (Uuid, Uuid, Uuid, String, OffsetDateTime) =
            sqlx::query_as(
                r#"
                INSERT INTO internal_notes (id, ticket_id, author_id, content)
                VALUES ($1, $2, $3, $4)
                RETURNING id, ticket_id, author_id, content, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(note.ticket_id)
            .bind(note.author_id)
            .bind(&note.content)
            .fetch_one(&mut *tx)
            .await?;
        insert_event(&mut tx, &event, created_at).await?;
        tx.commit().await?;
        Ok(InternalNote {
            id,
            ticket_id,
            author_id,
            content,
            created_at,
        })
    }

    async fn internal_notes(&self, ticket_id: Uuid) -> StoreResult<Vec<InternalNote>> {
        let rows: Vec<(Uuid, Uuid, Uuid, String, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT id, ticket_id, author_id, content, created_at
            FROM internal_notes WHERE ticket_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, ticket_id, author_id, content, created_at)| InternalNote {
                id,
                ticket_id,
                author_id,
                content,
                created_at,
            })
            .collect())
    }

    async fn find_rating(&self, ticket_id: Uuid) -> StoreResult<Option<TicketRating>> {
        let row: Option<RatingRow> = sqlx::query_as(
            r#"
            SELECT id, ticket_id, client_id, rating, feedback, liked_speed, liked_clarity,
                   liked_politeness, liked_completeness, created_at
            FROM ticket_ratings WHERE ticket_id = $1
            "#,
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TicketRating::from))
    }

    async fn insert_rating(
        &self,
        rating: NewRating,
        stats: &[StatsUpdate],
    ) -> StoreResult<TicketRating> {
        let mut tx = self.pool.begin().await?;
        // UNIQUE(ticket_id) turns a concurrent second rating into a Conflict
        let row: RatingRow = sqlx::query_as(
            r#"
            INSERT INTO ticket_ratings (id, ticket_id, client_id, rating, feedback, liked_speed,
                                        liked_clarity, liked_politeness, liked_completeness)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, ticket_id, client_id, rating, feedback, liked_speed, liked_clarity,
                      liked_politeness, liked_completeness, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(rating.ticket_id)
        .bind(rating.client_id)
        .bind(rating.rating)
        .bind(&rating.feedback)
        .bind(rating.liked_speed)
        .bind(rating.liked_clarity)
        .bind(rating.liked_politeness)
        .bind(rating.liked_completeness)
        .fetch_one(&mut *tx)
        .await?;
        apply_stats(&mut tx, stats).await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn insert_message(&self, message: NewMessage, event: NewTicketEvent) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, ticket_id, author_id, content, is_internal, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(message.ticket_id)
        .bind(message.author_id)
        .bind(&message.content)
        .bind(message.is_internal)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        if !message.attachment_ids.is_empty() {
            sqlx::query(
                "INSERT INTO message_attachments (message_id, file_id) SELECT DISTINCT $1::uuid, UNNEST($2::uuid[])",
            )
            .bind(message.id)
            .bind(&message.attachment_ids)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE tickets SET updated_at = $2 WHERE id = $1")
            .bind(message.ticket_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        insert_event(&mut tx, &event, message.created_at).await?;
        tx.commit().await?;

        Ok(Message {
            id: message.id,
            ticket_id: message.ticket_id,
            author_id: message.author_id,
            content: message.content,
            is_internal: message.is_internal,
            attachment_ids: message.attachment_ids,
            created_at: message.created_at,
            read_at: None,
        })
    }

    async fn find_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE messages.id = $1");
        let row: Option<MessageRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Message::from))
    }

    async fn list_messages(&self, ticket_id: Uuid, include_internal: bool) -> StoreResult<Vec<Message>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE messages.ticket_id = $1 AND ($2 OR messages.is_internal = FALSE)
            ORDER BY messages.created_at ASC
            "#
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(ticket_id)
            .bind(include_internal)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn mark_message_read(
        &self,
        id: Uuid,
        reader_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Option<Message>> {
        let sql = format!(
            r#"
            UPDATE messages SET read_at = $3
            WHERE id = $1 AND author_id <> $2 AND read_at IS NULL
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let row: Option<MessageRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(reader_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Message::from))
    }

    async fn mark_messages_read(
        &self,
        ids: &[Uuid],
        reader_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            UPDATE messages SET read_at = $3
            WHERE id = ANY($1) AND author_id <> $2 AND read_at IS NULL
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(ids)
            .bind(reader_id)
            .bind(at)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn count_unread_messages(&self, ticket_id: Uuid, viewer_id: Uuid) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE ticket_id = $1 AND is_internal = FALSE AND read_at IS NULL AND author_id <> $2
            "#,
        )
        .bind(ticket_id)
        .bind(viewer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_notification(&self, notification: NewNotification) -> StoreResult<Notification> {
        let (entity_type, entity_id) = match notification.entity {
            Some((kind, id)) => (Some(kind.as_str()), Some(id)),
            None => (None, None),
        };
        let sql = format!(
            r#"
            INSERT INTO notifications (id, user_id, notification_type, title, message, entity_id, entity_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let row: NotificationRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(notification.user_id)
            .bind(notification.notification_type.as_str())
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(entity_id)
            .bind(entity_type)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        query: &NotificationQuery,
    ) -> StoreResult<(Vec<Notification>, i64)> {
        let kind = query.notification_type.map(|k| k.as_str());

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR is_read = FALSE)
              AND ($3::text IS NULL OR notification_type = $3)
            "#,
        )
        .bind(user_id)
        .bind(query.unread_only)
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR is_read = FALSE)
              AND ($3::text IS NULL OR notification_type = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        );
        let rows: Vec<NotificationRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(query.unread_only)
            .bind(kind)
            .bind(i64::from(query.page.limit))
            .bind(query.page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((collect(rows)?, total))
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        owner_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<Option<Notification>> {
        let sql = format!(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = COALESCE(read_at, $3)
            WHERE id = $1 AND user_id = $2
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let row: Option<NotificationRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(owner_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Notification::try_from).transpose()
    }

    async fn mark_notifications_read(
        &self,
        ids: &[Uuid],
        owner_id: Uuid,
        at: OffsetDateTime,
    ) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE notifications SET is_read = TRUE, read_at = $3
            WHERE id = ANY($1) AND user_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(ids)
        .bind(owner_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_all_notifications_read(&self, owner_id: Uuid, at: OffsetDateTime) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, read_at = $2 WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(owner_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_notification(&self, id: Uuid, owner_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_notifications(&self, owner_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("card"), "%card%");
        assert_eq!(like_pattern("100%_off"), "%100\\%\\_off%");
    }
}
