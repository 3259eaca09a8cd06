use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::{Sink, SinkExt, StreamExt, stream};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{
    ClientInfo, ClientPortalStore, ErrorHandler, NoopHandler, PgWireConnectionState,
    PgWireServerHandlers, Type,
};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::{PgWireBackendMessage, PgWireFrontendMessage};
use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::server::{
    MaybeTls, PgWireMessageServerCodec, negotiate_tls, process_error, process_message,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::auth::RoomSyncAuthSource;
use crate::clock::SlotClock;
use crate::engine::{Engine, EngineError};
use crate::limits::NOTIFY_CHANNEL;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::session::{Session, SessionHub};
use crate::sql::{self, Command, DurationSpec, SlotSpec};

static NEXT_BACKEND_PID: AtomicI32 = AtomicI32::new(1);

/// A client must finish startup and authentication within this long.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// SQLSTATE sent with the FATAL error that ends a connection whose session
/// the hub tore down.
pub const SESSION_DROPPED_SQLSTATE: &str = "55000";

/// Per-connection handler. Owns the connection's live [`Session`] while it
/// is LISTENing; the connection loop pushes its events as they arrive.
pub struct RoomSyncHandler {
    engine: Arc<Engine>,
    hub: Arc<SessionHub>,
    session: Mutex<Option<Session>>,
    query_parser: Arc<RoomSyncQueryParser>,
    pid: i32,
}

impl RoomSyncHandler {
    pub fn new(engine: Arc<Engine>, hub: Arc<SessionHub>) -> Self {
        Self {
            engine,
            hub,
            session: Mutex::new(None),
            query_parser: Arc::new(RoomSyncQueryParser),
            pid: NEXT_BACKEND_PID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Release the live session, if any.
    pub async fn end_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            debug!("ending session {} for {}", session.id(), session.owner_id());
        }
    }

    /// Next event for this connection. `None` once the hub has torn the
    /// session down; never resolves while the connection is not listening.
    async fn next_event(&self) -> Option<DomainEvent> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            return session.recv().await;
        }
        drop(guard);
        std::future::pending().await
    }

    fn owner_id<C: ClientInfo>(client: &C) -> PgWireResult<String> {
        client
            .metadata()
            .get("user")
            .filter(|u| !u.is_empty())
            .cloned()
            .ok_or_else(|| user_error("28000", "no user in startup message".into()))
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let owner = Self::owner_id(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(&owner, cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, owner: &str, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        let clock = &engine.clock;
        match cmd {
            Command::InsertReservation {
                room,
                date,
                begin,
                duration,
            } => {
                let begin_slot = match begin {
                    SlotSpec::Slot(slot) => slot,
                    SlotSpec::Time(time) => clock.to_slot(time).map_err(clock_err)?,
                };
                let duration = duration_slots(duration)?;
                let reservation = engine
                    .book(&room, date, begin_slot, duration, owner)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![reservation_rows(clock, vec![reservation])?])
            }
            Command::DeleteReservation { id } => {
                engine.cancel(id, owner).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectReservations { room_day } => {
                let reservations = match room_day {
                    Some((room, date)) => engine.list_for_room_day(&room, date).await,
                    None => engine.list_reservations(owner).await,
                };
                Ok(vec![reservation_rows(clock, reservations)?])
            }
            Command::SelectAvailability {
                room,
                date,
                duration,
            } => {
                let duration = duration_slots(duration)?;
                let starts = engine.get_availability(&room, date, duration).await;
                Ok(vec![availability_rows(clock, &room, date, duration, starts)?])
            }
            Command::SelectOccupancy { room, date } => {
                let spans = engine.occupancy(&room, date).await;
                Ok(vec![occupancy_rows(clock, &room, date, spans)?])
            }
            Command::Listen { channel } => {
                if channel != NOTIFY_CHANNEL {
                    return Err(user_error(
                        "42704",
                        format!("unknown channel {channel} (only {NOTIFY_CHANNEL})"),
                    ));
                }
                let mut guard = self.session.lock().await;
                if guard.is_none() {
                    let session = self
                        .hub
                        .register(owner)
                        .ok_or_else(|| user_error("54000", "too many live sessions".into()))?;
                    info!("session {} listening for {owner}", session.id());
                    *guard = Some(session);
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                if channel.as_deref().is_none_or(|c| c == NOTIFY_CHANNEL) {
                    self.end_session().await;
                }
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

fn duration_slots(requested: DurationSpec) -> PgWireResult<Slot> {
    match requested {
        DurationSpec::Slots(n) => Ok(n),
        DurationSpec::Hours(h) => SlotClock::duration_to_slots(h).map_err(clock_err),
    }
}

// ── Result sets ───────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("room"),
        text_field("date"),
        int_field("begin_slot"),
        int_field("duration"),
        text_field("begin_time"),
        text_field("end_time"),
        text_field("owner"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room"),
        text_field("date"),
        int_field("begin_slot"),
        text_field("begin_time"),
        text_field("end_time"),
    ]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room"),
        text_field("date"),
        int_field("begin_slot"),
        int_field("end_slot"),
        text_field("begin_time"),
        text_field("end_time"),
    ]
}

/// Schema for a statement by its target table, for Describe.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("OCCUPANCY") {
        occupancy_schema()
    } else if upper.contains("RESERVATIONS")
        && (upper.trim_start().starts_with("SELECT") || upper.trim_start().starts_with("INSERT"))
    {
        reservation_schema()
    } else {
        vec![]
    }
}

/// `HH:MM` of a slot boundary; NULL when the boundary lies outside the
/// current operating window.
fn hhmm(clock: &SlotClock, boundary: Slot) -> Option<String> {
    clock
        .boundary_time(boundary)
        .ok()
        .map(|t| t.format("%H:%M").to_string())
}

fn reservation_rows(clock: &SlotClock, reservations: Vec<Reservation>) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.room_name)?;
            encoder.encode_field(&r.date.to_string())?;
            encoder.encode_field(&(r.begin_slot as i64))?;
            encoder.encode_field(&(r.duration as i64))?;
            encoder.encode_field(&hhmm(clock, r.begin_slot))?;
            encoder.encode_field(&hhmm(clock, r.begin_slot + r.duration))?;
            encoder.encode_field(&r.owner_id)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn availability_rows(
    clock: &SlotClock,
    room: &str,
    date: NaiveDate,
    duration: Slot,
    starts: Vec<Slot>,
) -> PgWireResult<Response> {
    let schema = Arc::new(availability_schema());
    let date = date.to_string();
    let rows: Vec<PgWireResult<_>> = starts
        .into_iter()
        .map(|slot| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&room)?;
            encoder.encode_field(&date)?;
            encoder.encode_field(&(slot as i64))?;
            encoder.encode_field(&hhmm(clock, slot))?;
            encoder.encode_field(&hhmm(clock, slot + duration))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn occupancy_rows(
    clock: &SlotClock,
    room: &str,
    date: NaiveDate,
    spans: Vec<SlotSpan>,
) -> PgWireResult<Response> {
    let schema = Arc::new(occupancy_schema());
    let date = date.to_string();
    let rows: Vec<PgWireResult<_>> = spans
        .into_iter()
        .map(|span| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&room)?;
            encoder.encode_field(&date)?;
            encoder.encode_field(&(span.start as i64))?;
            encoder.encode_field(&(span.end as i64))?;
            encoder.encode_field(&hhmm(clock, span.start))?;
            encoder.encode_field(&hhmm(clock, span.end))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for RoomSyncHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomSyncQueryParser;

#[async_trait]
impl QueryParser for RoomSyncQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomSyncHandler {
    type Statement = String;
    type QueryParser = RoomSyncQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound parameters (text format) as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass: each `$N` outside a string literal becomes the
/// literal for parameter N. Inlined values are never rescanned, and
/// placeholders with no matching parameter are left as written.
fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_literal = !in_literal,
            b'$' if !in_literal => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                let param = sql[i + 1..i + 1 + digits]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| params.get(n));
                if let Some(param) = param {
                    out.push_str(&sql[copied..i]);
                    out.push_str(&sql_literal(param.as_ref()));
                    i += 1 + digits;
                    copied = i;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    out.push_str(&sql[copied..]);
    out
}

fn sql_literal<B: AsRef<[u8]>>(param: Option<&B>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes.as_ref());
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomSyncFactory {
    handler: Arc<RoomSyncHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomSyncAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomSyncFactory {
    pub fn new(engine: Arc<Engine>, hub: Arc<SessionHub>, password: String) -> Self {
        Self {
            handler: Arc::new(RoomSyncHandler::new(engine, hub)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                RoomSyncAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomSyncFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler<Statement = String>> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

type WireSocket = Framed<MaybeTls, PgWireMessageServerCodec<String>>;

enum Wake {
    Frontend(Option<PgWireResult<PgWireFrontendMessage>>),
    Event(Option<DomainEvent>),
}

/// Serve one client connection until it closes. Its live session, if any,
/// is released on the way out whatever the outcome.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    hub: Arc<SessionHub>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = RoomSyncFactory::new(engine, hub, password);
    let result = serve(socket, tls, &factory).await;
    factory.handler.end_session().await;
    result
}

/// The pgwire message loop, extended to wait on the connection's live
/// session as well. Events go out as NotificationResponses the moment they
/// arrive, idle or not. Client messages are handled outside the select, so a
/// notification never lands inside a statement's response.
async fn serve(tcp: TcpStream, tls: Option<TlsAcceptor>, factory: &RoomSyncFactory) -> io::Result<()> {
    let startup_timeout = tokio::time::sleep(STARTUP_TIMEOUT);
    tokio::pin!(startup_timeout);

    let negotiated = tokio::select! {
        _ = &mut startup_timeout => return Ok(()),
        socket = negotiate_tls::<String>(tcp, tls) => socket?,
    };
    // direct TLS from the client with no acceptor configured
    let Some(mut socket) = negotiated else {
        return Ok(());
    };

    let startup_handler = factory.startup_handler();
    let simple_query_handler = factory.simple_query_handler();
    let extended_query_handler = factory.extended_query_handler();
    let copy_handler = factory.copy_handler();
    let cancel_handler = factory.cancel_handler();
    let error_handler = factory.error_handler();
    let handler = &factory.handler;

    loop {
        let starting = matches!(
            socket.state(),
            PgWireConnectionState::AwaitingStartup
                | PgWireConnectionState::AuthenticationInProgress
        );
        let wake = tokio::select! {
            _ = &mut startup_timeout, if starting => return Ok(()),
            msg = socket.next() => Wake::Frontend(msg),
            event = handler.next_event(), if !starting => Wake::Event(event),
        };

        match wake {
            Wake::Frontend(Some(Ok(msg))) => {
                let is_extended_query = match socket.state() {
                    PgWireConnectionState::CopyInProgress(is_extended_query) => is_extended_query,
                    _ => msg.is_extended_query(),
                };
                if let Err(mut e) = process_message(
                    msg,
                    &mut socket,
                    startup_handler.clone(),
                    simple_query_handler.clone(),
                    extended_query_handler.clone(),
                    copy_handler.clone(),
                    cancel_handler.clone(),
                )
                .await
                {
                    error_handler.on_error(&socket, &mut e);
                    process_error(&mut socket, e, is_extended_query).await?;
                }
            }
            Wake::Frontend(Some(Err(e))) => {
                debug!("undecodable frontend message, closing: {e}");
                break;
            }
            Wake::Frontend(None) => break,
            Wake::Event(Some(event)) => push_notification(&mut socket, handler.pid, &event).await?,
            Wake::Event(None) => {
                if let Some(session) = handler.session.lock().await.take() {
                    warn!(
                        "session {} for {} was dropped by the hub, closing its connection",
                        session.id(),
                        session.owner_id()
                    );
                }
                close_dropped_session(&mut socket).await?;
                break;
            }
        }
    }
    Ok(())
}

async fn push_notification(socket: &mut WireSocket, pid: i32, event: &DomainEvent) -> io::Result<()> {
    let payload = event.to_json().map_err(io::Error::other)?;
    socket
        .send(PgWireBackendMessage::NotificationResponse(
            NotificationResponse::new(pid, NOTIFY_CHANNEL.to_string(), payload),
        ))
        .await
}

/// The session missed events, so the client's view is stale. Fail the
/// connection so the client reconnects, LISTENs again and re-fetches.
async fn close_dropped_session(socket: &mut WireSocket) -> io::Result<()> {
    let info = ErrorInfo::new(
        "FATAL".into(),
        SESSION_DROPPED_SQLSTATE.into(),
        "live session dropped after its event queue overflowed; reconnect, LISTEN again and re-fetch"
            .into(),
    );
    socket
        .send(PgWireBackendMessage::ErrorResponse(info.into()))
        .await?;
    socket.close().await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine error.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict { .. } => "23P01",
        EngineError::Forbidden(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        EngineError::OutOfWindow { .. } | EngineError::InvalidDuration(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn clock_err(e: crate::clock::ClockError) -> PgWireError {
    engine_err(e.into())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn sqlstate_mapping() {
        let id = Ulid::new();
        assert_eq!(
            sqlstate(&EngineError::Conflict {
                with: id,
                span: SlotSpan::new(20, 24)
            }),
            "23P01"
        );
        assert_eq!(sqlstate(&EngineError::Forbidden(id)), "42501");
        assert_eq!(sqlstate(&EngineError::NotFound(id)), "P0002");
        assert_eq!(sqlstate(&EngineError::InvalidDuration("0".into())), "22023");
        assert_eq!(sqlstate(&EngineError::LimitExceeded("x")), "54000");
    }

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM reservations"), 0);
        assert_eq!(
            count_params("SELECT * FROM availability WHERE room = $1 AND date = $2 AND duration = $3"),
            3
        );
        assert_eq!(count_params("DELETE FROM reservations WHERE id = $12"), 12);
    }

    #[test]
    fn params_are_inlined_in_one_pass() {
        let sql = "SELECT * FROM availability WHERE room = $1 AND date = $2 AND duration = $3";
        // a value that looks like a placeholder is not substituted again
        assert_eq!(
            inline_params(sql, &[Some("R$2"), Some("2099-05-04"), Some("2")]),
            "SELECT * FROM availability WHERE room = 'R$2' AND date = '2099-05-04' AND duration = '2'"
        );

        let params: Vec<Option<String>> = (1..=10).map(|n| Some(format!("v{n}"))).collect();
        assert_eq!(inline_params("$1,$10,$1", &params), "'v1','v10','v1'");
    }

    #[test]
    fn param_literals_quote_and_null() {
        assert_eq!(
            inline_params("INSERT INTO reservations VALUES ($1, $2)", &[Some("O'Hare"), None]),
            "INSERT INTO reservations VALUES ('O''Hare', NULL)"
        );
        // placeholders inside literals and past the bound parameters stay
        assert_eq!(
            inline_params("SELECT '$1', 'it''s $1', $1, $4", &[Some("x")]),
            "SELECT '$1', 'it''s $1', 'x', $4"
        );
        assert_eq!(inline_params::<&str>("SELECT $", &[]), "SELECT $");
    }

    #[test]
    fn describe_schema_by_table() {
        let names = |sql: &str| -> Vec<String> {
            result_schema(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(names("SELECT * FROM availability WHERE room = $1")[2], "begin_slot");
        assert_eq!(names("select * from occupancy")[3], "end_slot");
        assert_eq!(names("INSERT INTO reservations VALUES ($1, $2, $3, $4)")[0], "id");
        assert!(names("DELETE FROM reservations WHERE id = $1").is_empty());
        assert!(names("LISTEN reservations").is_empty());
    }

    #[test]
    fn slot_labels() {
        let clock = SlotClock::default();
        assert_eq!(hhmm(&clock, 20).as_deref(), Some("10:00"));
        assert_eq!(hhmm(&clock, 42).as_deref(), Some("21:00"));
        assert_eq!(hhmm(&clock, 10), None);
    }
}
