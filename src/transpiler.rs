//! SQL transpiler for the statement tree.
//!
//! Renders [`ast`](crate::ast) nodes into parameterised SQL. Values are never
//! inlined: each one is collected into the statement's parameter list and
//! referenced as `$N`, which both sqlx drivers accept.

use crate::ast::*;
use crate::query::{Comparison, Interval};

/// Target database flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Pick the dialect from a connection URL.
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres") {
            Dialect::Postgres
        } else {
            Dialect::Sqlite
        }
    }
}

/// Rendered SQL plus its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Accumulates SQL text and parameters.
pub struct SqlWriter {
    dialect: Dialect,
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlWriter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Push a double-quoted identifier.
    pub fn ident(&mut self, name: &str) {
        self.sql.push('"');
        self.sql.push_str(&name.replace('"', "\"\""));
        self.sql.push('"');
    }

    /// Collect a parameter and push its placeholder.
    pub fn bind(&mut self, value: SqlValue) {
        self.params.push(value);
        self.sql.push('$');
        self.sql.push_str(&self.params.len().to_string());
    }

    fn list<T: ToSql>(&mut self, items: &[T], sep: &str) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            item.write_sql(self);
        }
    }

    fn idents(&mut self, names: &[String]) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name);
        }
    }

    pub fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Trait for converting tree nodes to SQL.
pub trait ToSql {
    /// Append this node to the writer.
    fn write_sql(&self, w: &mut SqlWriter);

    /// Render this node as a standalone statement.
    fn to_sql(&self, dialect: Dialect) -> Statement {
        let mut w = SqlWriter::new(dialect);
        self.write_sql(&mut w);
        w.finish()
    }
}

impl ToSql for ColumnRef {
    fn write_sql(&self, w: &mut SqlWriter) {
        w.push(&self.alias);
        w.push(".");
        w.ident(&self.column);
    }
}

impl ToSql for Expr {
    fn write_sql(&self, w: &mut SqlWriter) {
        match self {
            Expr::Column(col) => col.write_sql(w),
            Expr::Raw(sql) => w.push(sql),
            Expr::Lower(inner) => {
                w.push("LOWER(");
                inner.write_sql(w);
                w.push(")");
            }
            Expr::Cast(inner, ty) => {
                w.push("CAST(");
                inner.write_sql(w);
                w.push(" AS ");
                w.push(ty);
                w.push(")");
            }
            Expr::Param(value) => w.bind(value.clone()),
            Expr::Min(inner) => {
                w.push("MIN(");
                inner.write_sql(w);
                w.push(")");
            }
            Expr::Count(inner) => {
                w.push("COUNT(");
                inner.write_sql(w);
                w.push(")");
            }
            Expr::DateShift {
                base,
                interval,
                backwards,
                date_only,
            } => write_date_shift(w, base, interval, *backwards, *date_only),
            Expr::CountAll => w.push("COUNT(*)"),
            Expr::Star => w.push("*"),
            Expr::One => w.push("1"),
        }
    }
}

/// Date arithmetic that yields the same text form the column stores:
/// `YYYY-MM-DD` for dates, fixed-width UTC RFC 3339 for timestamps.
fn write_date_shift(
    w: &mut SqlWriter,
    base: &SqlValue,
    interval: &Interval,
    backwards: bool,
    date_only: bool,
) {
    match w.dialect() {
        Dialect::Sqlite => {
            // SQLite keeps milliseconds only
            w.push(if date_only {
                "date("
            } else {
                "strftime('%Y-%m-%dT%H:%M:%f000Z', "
            });
            w.bind(base.clone());
            w.push(", ");
            w.bind(SqlValue::Text(interval.sqlite_modifier(backwards)));
            w.push(")");
        }
        Dialect::Postgres => {
            w.push("to_char(CAST(");
            w.bind(base.clone());
            w.push(if date_only { " AS DATE)" } else { " AS TIMESTAMP)" });
            w.push(if backwards { " - " } else { " + " });
            w.push("CAST(");
            w.bind(SqlValue::Text(interval.to_string()));
            w.push(" AS INTERVAL), ");
            w.push(if date_only {
                "'YYYY-MM-DD')"
            } else {
                r#"'YYYY-MM-DD"T"HH24:MI:SS.US"Z"')"#
            });
        }
    }
}

impl ToSql for Projection {
    fn write_sql(&self, w: &mut SqlWriter) {
        self.expr.write_sql(w);
        if let Some(label) = &self.label {
            w.push(" AS ");
            w.ident(label);
        }
    }
}

impl ToSql for Ordering {
    fn write_sql(&self, w: &mut SqlWriter) {
        self.expr.write_sql(w);
        w.push(match self.dir {
            SortDir::Asc => " ASC",
            SortDir::Desc => " DESC",
        });
    }
}

/// Escape `%`, `_` and the escape character for `LIKE ... ESCAPE '\'`.
pub fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape glob metacharacters by wrapping them in a character class.
pub fn glob_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Anchoring of a pattern comparison.
#[derive(Clone, Copy)]
enum Anchor {
    Anywhere,
    Start,
    End,
}

fn write_pattern(
    w: &mut SqlWriter,
    left: &Expr,
    right: &Operand,
    anchor: Anchor,
    case_sensitive: bool,
) {
    let text = match right {
        Operand::Value(v) => v.as_text(),
        Operand::List(values) => values.first().map(SqlValue::as_text).unwrap_or_default(),
        Operand::Select(_) | Operand::Expr(_) | Operand::None => String::new(),
    };
    let wrap = |escaped: String, any: &str| match anchor {
        Anchor::Anywhere => format!("{any}{escaped}{any}"),
        Anchor::Start => format!("{escaped}{any}"),
        Anchor::End => format!("{any}{escaped}"),
    };

    if case_sensitive && w.dialect() == Dialect::Sqlite {
        // SQLite LIKE folds ASCII case, GLOB does not.
        left.write_sql(w);
        w.push(" GLOB ");
        w.bind(SqlValue::Text(wrap(glob_escape(&text), "*")));
    } else if case_sensitive {
        left.write_sql(w);
        w.push(" LIKE ");
        w.bind(SqlValue::Text(wrap(like_escape(&text), "%")));
        w.push(" ESCAPE '\\'");
    } else {
        w.push("LOWER(");
        left.write_sql(w);
        w.push(") LIKE LOWER(");
        w.bind(SqlValue::Text(wrap(like_escape(&text), "%")));
        w.push(") ESCAPE '\\'");
    }
}

fn write_operand(w: &mut SqlWriter, right: &Operand) {
    match right {
        Operand::None => w.push("NULL"),
        Operand::Value(v) => w.bind(v.clone()),
        Operand::List(values) => {
            w.push("(");
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.bind(v.clone());
            }
            w.push(")");
        }
        Operand::Select(select) => {
            w.push("(");
            select.write_sql(w);
            w.push(")");
        }
        Operand::Expr(expr) => expr.write_sql(w),
    }
}

fn write_compare(w: &mut SqlWriter, left: &Expr, op: Comparison, right: &Operand) {
    let is_null = matches!(right, Operand::None | Operand::Value(SqlValue::Null));
    match op {
        Comparison::IsNull => {
            left.write_sql(w);
            w.push(" IS NULL");
        }
        Comparison::IsNotNull => {
            left.write_sql(w);
            w.push(" IS NOT NULL");
        }
        Comparison::Eq if is_null => {
            left.write_sql(w);
            w.push(" IS NULL");
        }
        Comparison::Ne if is_null => {
            left.write_sql(w);
            w.push(" IS NOT NULL");
        }
        Comparison::In | Comparison::NotIn => {
            let negate = op == Comparison::NotIn;
            match right {
                Operand::List(values) if values.is_empty() => {
                    w.push(if negate { "1 = 1" } else { "1 = 0" });
                }
                Operand::Value(v) => {
                    left.write_sql(w);
                    w.push(if negate { " NOT IN " } else { " IN " });
                    write_operand(w, &Operand::List(vec![v.clone()]));
                }
                _ => {
                    left.write_sql(w);
                    w.push(if negate { " NOT IN " } else { " IN " });
                    write_operand(w, right);
                }
            }
        }
        Comparison::Contains | Comparison::Like => {
            write_pattern(w, left, right, Anchor::Anywhere, true)
        }
        Comparison::IContains | Comparison::ILike => {
            write_pattern(w, left, right, Anchor::Anywhere, false)
        }
        Comparison::StartsWith => write_pattern(w, left, right, Anchor::Start, true),
        Comparison::EndsWith => write_pattern(w, left, right, Anchor::End, true),
        Comparison::IStartsWith => write_pattern(w, left, right, Anchor::Start, false),
        Comparison::IEndsWith => write_pattern(w, left, right, Anchor::End, false),
        Comparison::Eq
        | Comparison::Ne
        | Comparison::Lt
        | Comparison::Le
        | Comparison::Gt
        | Comparison::Ge => {
            left.write_sql(w);
            w.push(match op {
                Comparison::Eq => " = ",
                Comparison::Ne => " <> ",
                Comparison::Lt => " < ",
                Comparison::Le => " <= ",
                Comparison::Gt => " > ",
                _ => " >= ",
            });
            write_operand(w, right);
        }
    }
}

impl ToSql for Predicate {
    fn write_sql(&self, w: &mut SqlWriter) {
        match self {
            Predicate::Compare { left, op, right } => write_compare(w, left, *op, right),
            Predicate::ColumnsEqual(a, b) => {
                a.write_sql(w);
                w.push(" = ");
                b.write_sql(w);
            }
            Predicate::And(preds) | Predicate::Or(preds) => {
                let (joiner, empty) = match self {
                    Predicate::And(_) => (" AND ", "1 = 1"),
                    _ => (" OR ", "1 = 0"),
                };
                if preds.is_empty() {
                    w.push(empty);
                    return;
                }
                for (i, p) in preds.iter().enumerate() {
                    if i > 0 {
                        w.push(joiner);
                    }
                    w.push("(");
                    p.write_sql(w);
                    w.push(")");
                }
            }
            Predicate::Exists(select) => {
                w.push("EXISTS (");
                select.write_sql(w);
                w.push(")");
            }
            Predicate::Constant(true) => w.push("1 = 1"),
            Predicate::Constant(false) => w.push("1 = 0"),
        }
    }
}

impl ToSql for FromItem {
    fn write_sql(&self, w: &mut SqlWriter) {
        match self {
            FromItem::Table(t) => {
                w.ident(&t.table);
                w.push(" AS ");
                w.push(&t.alias);
            }
            FromItem::Subquery { query, alias } => {
                w.push("(");
                query.write_sql(w);
                w.push(") AS ");
                w.push(alias);
            }
        }
    }
}

impl ToSql for Select {
    fn write_sql(&self, w: &mut SqlWriter) {
        w.push("SELECT ");
        if self.distinct {
            w.push("DISTINCT ");
        }
        if self.columns.is_empty() {
            w.push("*");
        } else {
            w.list(&self.columns, ", ");
        }

        w.push(" FROM ");
        w.list(&self.from, ", ");

        if let Some(filter) = &self.filter {
            w.push(" WHERE ");
            filter.write_sql(w);
        }

        if !self.group_by.is_empty() {
            w.push(" GROUP BY ");
            w.list(&self.group_by, ", ");
        }

        if !self.order_by.is_empty() {
            w.push(" ORDER BY ");
            w.list(&self.order_by, ", ");
        }

        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                w.push(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    w.push(&format!(" OFFSET {}", offset));
                }
            }
            (None, Some(offset)) => {
                if w.dialect() == Dialect::Sqlite {
                    w.push(" LIMIT -1");
                }
                w.push(&format!(" OFFSET {}", offset));
            }
            (None, None) => {}
        }
    }
}

impl ToSql for Query {
    fn write_sql(&self, w: &mut SqlWriter) {
        match self {
            Query::Select(select) => select.write_sql(w),
            Query::Union { branches, all } => {
                w.list(branches, if *all { " UNION ALL " } else { " UNION " });
            }
        }
    }
}

fn write_key(w: &mut SqlWriter, key: &[(String, SqlValue)]) {
    if key.is_empty() {
        return;
    }
    w.push(" WHERE ");
    for (i, (column, value)) in key.iter().enumerate() {
        if i > 0 {
            w.push(" AND ");
        }
        w.ident(column);
        if value.is_null() {
            w.push(" IS NULL");
        } else {
            w.push(" = ");
            w.bind(value.clone());
        }
    }
}

impl ToSql for Insert {
    fn write_sql(&self, w: &mut SqlWriter) {
        w.push("INSERT INTO ");
        w.ident(&self.table);
        let columns: Vec<String> = self.values.iter().map(|(c, _)| c.clone()).collect();
        w.push(" (");
        w.idents(&columns);
        w.push(") VALUES (");
        for (i, (_, value)) in self.values.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.bind(value.clone());
        }
        w.push(")");
    }
}

impl ToSql for Update {
    fn write_sql(&self, w: &mut SqlWriter) {
        w.push("UPDATE ");
        w.ident(&self.table);
        w.push(" SET ");
        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(column);
            w.push(" = ");
            w.bind(value.clone());
        }
        write_key(w, &self.key);
    }
}

impl ToSql for Delete {
    fn write_sql(&self, w: &mut SqlWriter) {
        w.push("DELETE FROM ");
        w.ident(&self.table);
        write_key(w, &self.key);
    }
}

impl ToSql for CreateTable {
    fn write_sql(&self, w: &mut SqlWriter) {
        w.push("CREATE TABLE IF NOT EXISTS ");
        w.ident(&self.table);
        w.push(" (");
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(&col.name);
            w.push(" ");
            w.push(col.sql_type);
            if !col.nullable {
                w.push(" NOT NULL");
            }
            if col.unique {
                w.push(" UNIQUE");
            }
        }
        if !self.primary_key.is_empty() {
            w.push(", PRIMARY KEY (");
            w.idents(&self.primary_key);
            w.push(")");
        }
        for columns in &self.unique {
            w.push(", UNIQUE (");
            w.idents(columns);
            w.push(")");
        }
        w.push(")");
    }
}

impl ToSql for DropTable {
    fn write_sql(&self, w: &mut SqlWriter) {
        w.push("DROP TABLE IF EXISTS ");
        w.ident(&self.table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn name_eq(value: &str) -> Predicate {
        Predicate::Compare {
            left: Expr::column("t0", "name"),
            op: Comparison::Eq,
            right: Operand::Value(value.into()),
        }
    }

    #[test]
    fn test_simple_select() {
        let stmt = Select::from_table("user", "t0")
            .column(Expr::Star)
            .to_sql(Dialect::Sqlite);
        assert_eq!(stmt.sql, r#"SELECT * FROM "user" AS t0"#);
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_select_with_where_order_limit() {
        let stmt = Select::from_table("user", "t0")
            .column(Expr::column("t0", "id"))
            .and_where(Some(name_eq("Turner")))
            .order(Expr::column("t0", "name").lower(), SortDir::Desc)
            .window(Some(10), Some(5))
            .to_sql(Dialect::Postgres);
        assert_eq!(
            stmt.sql,
            r#"SELECT t0."id" FROM "user" AS t0 WHERE t0."name" = $1 ORDER BY LOWER(t0."name") DESC LIMIT 10 OFFSET 5"#
        );
        assert_eq!(stmt.params, vec![SqlValue::Text("Turner".into())]);
    }

    #[test]
    fn test_offset_without_limit() {
        let select = Select::from_table("user", "t0").window(None, Some(3));
        assert_eq!(
            select.to_sql(Dialect::Sqlite).sql,
            r#"SELECT * FROM "user" AS t0 LIMIT -1 OFFSET 3"#
        );
        assert_eq!(
            select.to_sql(Dialect::Postgres).sql,
            r#"SELECT * FROM "user" AS t0 OFFSET 3"#
        );
    }

    #[test]
    fn test_or_conditions() {
        let pred = Predicate::Or(vec![name_eq("Turner"), name_eq("Hooch")]);
        let stmt = pred.to_sql(Dialect::Sqlite);
        assert_eq!(stmt.sql, r#"(t0."name" = $1) OR (t0."name" = $2)"#);
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_null_comparisons() {
        let pred = Predicate::Compare {
            left: Expr::column("t0", "boss_id"),
            op: Comparison::Ne,
            right: Operand::Value(SqlValue::Null),
        };
        assert_eq!(pred.to_sql(Dialect::Sqlite).sql, r#"t0."boss_id" IS NOT NULL"#);
    }

    #[test]
    fn test_empty_in_lists() {
        let in_empty = Predicate::Compare {
            left: Expr::column("t0", "id"),
            op: Comparison::In,
            right: Operand::List(vec![]),
        };
        let notin_empty = Predicate::Compare {
            left: Expr::column("t0", "id"),
            op: Comparison::NotIn,
            right: Operand::List(vec![]),
        };
        assert_eq!(in_empty.to_sql(Dialect::Sqlite).sql, "1 = 0");
        assert_eq!(notin_empty.to_sql(Dialect::Sqlite).sql, "1 = 1");
    }

    #[test]
    fn test_contains_per_dialect() {
        let pred = Predicate::Compare {
            left: Expr::column("t0", "name"),
            op: Comparison::Contains,
            right: Operand::Value("a*b%".into()),
        };
        let sqlite = pred.to_sql(Dialect::Sqlite);
        assert_eq!(sqlite.sql, r#"t0."name" GLOB $1"#);
        assert_eq!(sqlite.params, vec![SqlValue::Text("*a[*]b%*".into())]);

        let pg = pred.to_sql(Dialect::Postgres);
        assert_eq!(pg.sql, r#"t0."name" LIKE $1 ESCAPE '\'"#);
        assert_eq!(pg.params, vec![SqlValue::Text("%a*b\\%%".into())]);
    }

    #[test]
    fn test_case_insensitive_prefix() {
        let pred = Predicate::Compare {
            left: Expr::column("t0", "name"),
            op: Comparison::IStartsWith,
            right: Operand::Value("tur_".into()),
        };
        let stmt = pred.to_sql(Dialect::Sqlite);
        assert_eq!(stmt.sql, r#"LOWER(t0."name") LIKE LOWER($1) ESCAPE '\'"#);
        assert_eq!(stmt.params, vec![SqlValue::Text("tur\\_%".into())]);
    }

    #[test]
    fn test_union_in_derived_table() {
        let branch = |table: &str| {
            Select::from_table(table, "t0")
                .column(Expr::column("t0", "id"))
                .labeled(
                    Expr::Cast(Box::new(Expr::Param(table.into())), "TEXT"),
                    "_table_name",
                )
        };
        let union = Query::Union {
            branches: vec![branch("User"), branch("Tag")],
            all: false,
        };
        let stmt = Select::from_query(union, "u")
            .column(Expr::CountAll)
            .to_sql(Dialect::Sqlite);
        assert_eq!(
            stmt.sql,
            r#"SELECT COUNT(*) FROM (SELECT t0."id", CAST($1 AS TEXT) AS "_table_name" FROM "User" AS t0 UNION SELECT t0."id", CAST($2 AS TEXT) AS "_table_name" FROM "Tag" AS t0) AS u"#
        );
    }

    #[test]
    fn test_dml() {
        let insert = Insert {
            table: "tag".into(),
            values: vec![("id".into(), "x".into()), ("name".into(), "Male".into())],
        };
        assert_eq!(
            insert.to_sql(Dialect::Sqlite).sql,
            r#"INSERT INTO "tag" ("id", "name") VALUES ($1, $2)"#
        );

        let update = Update {
            table: "tag".into(),
            assignments: vec![("name".into(), "Ninja".into())],
            key: vec![("id".into(), "x".into())],
        };
        assert_eq!(
            update.to_sql(Dialect::Sqlite).sql,
            r#"UPDATE "tag" SET "name" = $1 WHERE "id" = $2"#
        );

        let delete = Delete {
            table: "tag".into(),
            key: vec![("id".into(), "x".into())],
        };
        assert_eq!(
            delete.to_sql(Dialect::Sqlite).sql,
            r#"DELETE FROM "tag" WHERE "id" = $1"#
        );
    }

    #[test]
    fn test_create_table() {
        let ddl = CreateTable {
            table: "tag".into(),
            columns: vec![
                ColumnDdl {
                    name: "id".into(),
                    sql_type: "TEXT",
                    nullable: false,
                    unique: false,
                },
                ColumnDdl {
                    name: "name".into(),
                    sql_type: "TEXT",
                    nullable: false,
                    unique: false,
                },
            ],
            primary_key: vec!["id".into()],
            unique: vec![vec!["user_id".into(), "name".into()]],
        };
        assert_eq!(
            ddl.to_sql(Dialect::Sqlite).sql,
            r#"CREATE TABLE IF NOT EXISTS "tag" ("id" TEXT NOT NULL, "name" TEXT NOT NULL, PRIMARY KEY ("id"), UNIQUE ("user_id", "name"))"#
        );
    }

    #[test]
    fn test_date_shift_per_dialect() {
        let within_month = |date_only| Predicate::Compare {
            left: Expr::column("t0", "born"),
            op: Comparison::Ge,
            right: Operand::Expr(Box::new(Expr::DateShift {
                base: "2017-05-07".into(),
                interval: Interval::months(1),
                backwards: true,
                date_only,
            })),
        };

        let stmt = within_month(true).to_sql(Dialect::Sqlite);
        assert_eq!(stmt.sql, r#"t0."born" >= date($1, $2)"#);
        assert_eq!(
            stmt.params,
            vec![SqlValue::Text("2017-05-07".into()), SqlValue::Text("-1 months".into())]
        );
        assert_eq!(
            within_month(false).to_sql(Dialect::Sqlite).sql,
            r#"t0."born" >= strftime('%Y-%m-%dT%H:%M:%f000Z', $1, $2)"#
        );

        let stmt = within_month(true).to_sql(Dialect::Postgres);
        assert_eq!(
            stmt.sql,
            r#"t0."born" >= to_char(CAST($1 AS DATE) - CAST($2 AS INTERVAL), 'YYYY-MM-DD')"#
        );
        assert_eq!(stmt.params[1], SqlValue::Text("1 month".into()));
        assert_eq!(
            within_month(false).to_sql(Dialect::Postgres).sql,
            r#"t0."born" >= to_char(CAST($1 AS TIMESTAMP) - CAST($2 AS INTERVAL), 'YYYY-MM-DD"T"HH24:MI:SS.US"Z"')"#
        );
    }
}
