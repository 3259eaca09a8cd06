use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::Slot;

/// Start of a requested booking: a slot index or a wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotSpec {
    Slot(Slot),
    Time(NaiveTime),
}

/// Length of a requested booking: slots or hours (multiples of 0.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DurationSpec {
    Slots(Slot),
    Hours(f64),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        room: String,
        date: NaiveDate,
        begin: SlotSpec,
        duration: DurationSpec,
    },
    DeleteReservation {
        id: Ulid,
    },
    /// Caller's own reservations, or one RoomDay when filtered.
    SelectReservations {
        room_day: Option<(String, NaiveDate)>,
    },
    SelectAvailability {
        room: String,
        date: NaiveDate,
        duration: DurationSpec,
    },
    SelectOccupancy {
        room: String,
        date: NaiveDate,
    },
    Listen {
        channel: String,
    },
    /// `None` for `UNLISTEN *`.
    Unlisten {
        channel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(rest) = strip_keyword(trimmed, "LISTEN") {
        return Ok(Command::Listen {
            channel: channel_name(rest)?,
        });
    }
    if let Some(rest) = strip_keyword(trimmed, "UNLISTEN") {
        let rest = rest.trim();
        let channel = match rest {
            "" | "*" => None,
            name => Some(channel_name(name)?),
        };
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    match stmts.as_slice() {
        [] => Err(SqlError::Empty),
        [Statement::Insert(insert)] => parse_insert(insert),
        [Statement::Delete(delete)] => parse_delete(delete),
        [Statement::Query(query)] => parse_select(query),
        [other] => Err(SqlError::Unsupported(format!("{other}"))),
        _ => Err(SqlError::Unsupported("multiple statements".into())),
    }
}

/// Remainder after a leading case-insensitive keyword and a word boundary.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    let rest = &s[keyword.len()..];
    if head.eq_ignore_ascii_case(keyword) && (rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        Some(rest)
    } else {
        None
    }
}

fn channel_name(raw: &str) -> Result<String, SqlError> {
    let name = raw.trim().trim_matches('"');
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(SqlError::Parse(format!("bad channel name: {raw}")));
    }
    Ok(name.to_lowercase())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;

    let columns: Vec<String> = if insert.columns.is_empty() {
        ["room", "date", "begin_slot", "duration"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity("reservations", columns.len(), values.len()));
    }

    let (mut room, mut date, mut begin, mut duration) = (None, None, None, None);
    for (col, value) in columns.iter().zip(&values) {
        match col.as_str() {
            "room" | "room_name" => room = Some(parse_string(value)?),
            "date" => date = Some(parse_date(value)?),
            "begin_slot" | "slot" => begin = Some(SlotSpec::Slot(parse_slot(value)?)),
            "begin_time" | "time" => begin = Some(SlotSpec::Time(parse_time(value)?)),
            "duration" | "duration_slots" => {
                duration = Some(DurationSpec::Slots(parse_slot(value)?))
            }
            "hours" => duration = Some(DurationSpec::Hours(parse_f64(value)?)),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    Ok(Command::InsertReservation {
        room: room.ok_or(SqlError::MissingColumn("room"))?,
        date: date.ok_or(SqlError::MissingColumn("date"))?,
        begin: begin.ok_or(SqlError::MissingColumn("begin_slot"))?,
        duration: duration.ok_or(SqlError::MissingColumn("duration"))?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = collect_filters(delete.selection.as_ref())?;
    let id = filters.get("id").ok_or(SqlError::MissingFilter("id"))?;
    Ok(Command::DeleteReservation {
        id: parse_ulid(id)?,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "reservations" => {
            let room_day = match (filters.room()?, filters.date()?) {
                (Some(room), Some(date)) => Some((room, date)),
                (None, None) => None,
                (Some(_), None) => return Err(SqlError::MissingFilter("date")),
                (None, Some(_)) => return Err(SqlError::MissingFilter("room")),
            };
            Ok(Command::SelectReservations { room_day })
        }
        "availability" => {
            let duration = match (filters.get("duration"), filters.get("hours")) {
                (Some(slots), _) => DurationSpec::Slots(parse_slot(slots)?),
                (None, Some(hours)) => DurationSpec::Hours(parse_f64(hours)?),
                (None, None) => return Err(SqlError::MissingFilter("duration")),
            };
            Ok(Command::SelectAvailability {
                room: filters.room()?.ok_or(SqlError::MissingFilter("room"))?,
                date: filters.date()?.ok_or(SqlError::MissingFilter("date"))?,
                duration,
            })
        }
        "occupancy" => Ok(Command::SelectOccupancy {
            room: filters.room()?.ok_or(SqlError::MissingFilter("room"))?,
            date: filters.date()?.ok_or(SqlError::MissingFilter("date"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` pairs from an AND-only WHERE clause.
struct Filters(Vec<(String, Expr)>);

impl Filters {
    fn get(&self, col: &str) -> Option<&Expr> {
        self.0.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn room(&self) -> Result<Option<String>, SqlError> {
        self.get("room")
            .or_else(|| self.get("room_name"))
            .map(parse_string)
            .transpose()
    }

    fn date(&self) -> Result<Option<NaiveDate>, SqlError> {
        self.get("date").map(parse_date).transpose()
    }
}

fn collect_filters(selection: Option<&Expr>) -> Result<Filters, SqlError> {
    fn walk(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => walk(inner, out),
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                walk(left, out)?;
                walk(right, out)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref().clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!(
                "only AND-ed equality filters are supported, got {other}"
            ))),
        }
    }

    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out)?;
    }
    Ok(Filters(out))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("one reservation per INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Text of a literal: quoted strings and bare numbers alike.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    Ok(literal_text(expr)?.to_string())
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad reservation id {s}: {e}")))
}

fn parse_slot(expr: &Expr) -> Result<Slot, SqlError> {
    let s = literal_text(expr)?;
    s.parse()
        .map_err(|_| SqlError::Parse(format!("expected a non-negative slot count, got {s}")))
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    let s = literal_text(expr)?;
    s.parse()
        .map_err(|_| SqlError::Parse(format!("expected a number, got {s}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(expr)?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s} (want YYYY-MM-DD): {e}")))
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = literal_text(expr)?;
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time {s} (want HH:MM): {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(msg) => write!(f, "parse error: {msg}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(table, expected, got) => {
                write!(f, "{table}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing WHERE filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
