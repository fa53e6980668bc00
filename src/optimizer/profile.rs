//! Token-level facts about a SQL statement.
//!
//! The profile is built from `sqlparser`'s tokenizer rather than its parser
//! so that partial or dialect-specific SQL still yields useful facts, while
//! keywords inside string literals and comments are never mistaken for
//! structure.

use indexmap::IndexSet;
use serde::Deserialize;
use sqlparser::{
    dialect::{
        ClickHouseDialect, Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect,
        SQLiteDialect
    },
    keywords::Keyword,
    tokenizer::{Location, Token, Tokenizer, Word}
};

/// SQL dialect used for tokenizing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Generic,
    MySQL,
    #[default]
    PostgreSQL,
    SQLite,
    ClickHouse
}

impl SqlDialect {
    pub fn into_parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            Self::Generic => Box::new(GenericDialect {}),
            Self::MySQL => Box::new(MySqlDialect {}),
            Self::PostgreSQL => Box::new(PostgreSqlDialect {}),
            Self::SQLite => Box::new(SQLiteDialect {}),
            Self::ClickHouse => Box::new(ClickHouseDialect {})
        }
    }
}

/// Statement kind as determined by the first top-level verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other
}

/// A significant (non-whitespace) token and its byte offset in the source
#[derive(Debug, Clone)]
pub(crate) struct Lexeme {
    pub(crate) token:  Token,
    pub(crate) offset: usize
}

/// Structural facts gathered from one statement
#[derive(Debug, Clone)]
pub struct QueryProfile {
    pub statement:          StatementKind,
    pub joins:              usize,
    pub subqueries:         usize,
    pub unions:             usize,
    pub unions_without_all: usize,
    pub group_bys:          usize,
    pub order_bys:          usize,
    pub havings:            usize,
    /// WHERE on the outermost statement
    pub has_where:          bool,
    /// LIMIT or FETCH on the outermost statement
    pub has_limit:          bool,
    /// ORDER BY on the outermost statement
    pub has_order_by:       bool,
    pub offset:             Option<u64>,
    /// Bare `*` in a projection list (`COUNT(*)` and `t.*` excluded)
    pub select_star:        bool,
    /// `LIKE '%...'` or `ILIKE '%...'`
    pub leading_wildcard:   bool,
    pub where_columns:      IndexSet<String>,
    pub join_columns:       IndexSet<String>,
    pub order_columns:      IndexSet<String>,
    /// Byte offsets of `LIKE` keywords compared against a wildcard-free
    /// literal
    pub(crate) literal_likes: Vec<usize>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    None,
    Select,
    From,
    Join,
    JoinOn,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Other
}

impl QueryProfile {
    /// Tokenize `sql` and collect its profile
    pub fn build(sql: &str, dialect: SqlDialect) -> Result<Self, String> {
        let lexemes = lex(sql, dialect)?;
        Ok(Self::from_lexemes(&lexemes))
    }

    /// Weighted structural complexity
    pub fn complexity_score(&self) -> usize {
        self.joins * 2
            + self.subqueries * 3
            + self.unions * 2
            + self.group_bys
            + self.order_bys
            + self.havings * 2
    }

    /// Heuristic relative execution cost
    pub fn estimated_cost(&self) -> f64 {
        1.0 + self.joins as f64 * 0.5
            + self.subqueries as f64
            + self.group_bys as f64 * 0.3
            + self.order_bys as f64 * 0.2
    }

    /// Columns that would benefit from an index, in order of appearance
    pub fn index_candidates(&self) -> Vec<String> {
        self.where_columns
            .iter()
            .chain(&self.join_columns)
            .chain(&self.order_columns)
            .fold(IndexSet::new(), |mut set, column| {
                set.insert(column.clone());
                set
            })
            .into_iter()
            .collect()
    }

    fn from_lexemes(lexemes: &[Lexeme]) -> Self {
        let mut profile = Self {
            statement:          StatementKind::Other,
            joins:              0,
            subqueries:         0,
            unions:             0,
            unions_without_all: 0,
            group_bys:          0,
            order_bys:          0,
            havings:            0,
            has_where:          false,
            has_limit:          false,
            has_order_by:       false,
            offset:             None,
            select_star:        false,
            leading_wildcard:   false,
            where_columns:      IndexSet::new(),
            join_columns:       IndexSet::new(),
            order_columns:      IndexSet::new(),
            literal_likes:      Vec::new()
        };
        let mut clause = Clause::None;
        let mut outer: Vec<Clause> = Vec::new();
        let token = move |i: usize| lexemes.get(i).map(|l| &l.token);

        let mut i = 0;
        while i < lexemes.len() {
            let prev = i.checked_sub(1).and_then(token);
            let next = token(i + 1);
            let top = outer.is_empty();

            match &lexemes[i].token {
                Token::LParen => {
                    outer.push(clause);
                    if next.is_some_and(|t| is_keyword(t, Keyword::SELECT)) {
                        profile.subqueries += 1;
                    }
                }
                Token::RParen => {
                    clause = outer.pop().unwrap_or(Clause::None);
                }
                Token::Mul if clause == Clause::Select => {
                    if prev.is_some_and(|t| {
                        matches!(t, Token::Comma)
                            || is_keyword(t, Keyword::SELECT)
                            || is_keyword(t, Keyword::DISTINCT)
                    }) {
                        profile.select_star = true;
                    }
                }
                Token::Word(word) if is_identifier(word) => {
                    let (column, consumed) = column_ref(lexemes, i);
                    let after = token(i + consumed);
                    if !after.is_some_and(|t| matches!(t, Token::LParen)) {
                        match clause {
                            Clause::Where | Clause::Having
                                if after.is_some_and(is_predicate)
                                    || prev.is_some_and(is_comparison) =>
                            {
                                profile.where_columns.insert(column);
                            }
                            Clause::JoinOn => {
                                profile.join_columns.insert(column);
                            }
                            Clause::OrderBy => {
                                profile.order_columns.insert(column);
                            }
                            _ => {}
                        }
                    }
                    i += consumed;
                    continue;
                }
                Token::Word(word) => match word.keyword {
                    Keyword::SELECT => {
                        if top && profile.statement == StatementKind::Other {
                            profile.statement = StatementKind::Select;
                        }
                        clause = Clause::Select;
                    }
                    Keyword::INSERT if top && profile.statement == StatementKind::Other => {
                        profile.statement = StatementKind::Insert;
                        clause = Clause::Other;
                    }
                    Keyword::UPDATE if top && profile.statement == StatementKind::Other => {
                        profile.statement = StatementKind::Update;
                        clause = Clause::Other;
                    }
                    Keyword::DELETE if top && profile.statement == StatementKind::Other => {
                        profile.statement = StatementKind::Delete;
                        clause = Clause::Other;
                    }
                    Keyword::FROM => clause = Clause::From,
                    Keyword::JOIN => {
                        profile.joins += 1;
                        clause = Clause::Join;
                    }
                    Keyword::ON | Keyword::USING if clause == Clause::Join => {
                        clause = Clause::JoinOn;
                    }
                    Keyword::WHERE => {
                        profile.has_where |= top;
                        clause = Clause::Where;
                    }
                    Keyword::GROUP if next.is_some_and(|t| is_keyword(t, Keyword::BY)) => {
                        profile.group_bys += 1;
                        clause = Clause::GroupBy;
                        i += 1;
                    }
                    Keyword::ORDER if next.is_some_and(|t| is_keyword(t, Keyword::BY)) => {
                        profile.order_bys += 1;
                        profile.has_order_by |= top;
                        clause = Clause::OrderBy;
                        i += 1;
                    }
                    Keyword::HAVING => {
                        profile.havings += 1;
                        clause = Clause::Having;
                    }
                    Keyword::UNION => {
                        profile.unions += 1;
                        if !next.is_some_and(|t| is_keyword(t, Keyword::ALL)) {
                            profile.unions_without_all += 1;
                        }
                        clause = Clause::None;
                    }
                    Keyword::LIMIT | Keyword::FETCH => {
                        profile.has_limit |= top;
                        clause = Clause::Limit;
                    }
                    Keyword::OFFSET => {
                        if let Some(Token::Number(n, _)) = next {
                            let n = n.parse().ok();
                            profile.offset = profile.offset.max(n);
                        }
                        clause = Clause::Limit;
                    }
                    Keyword::LIKE | Keyword::ILIKE => {
                        if let Some(Token::SingleQuotedString(pattern)) = next {
                            if pattern.starts_with('%') {
                                profile.leading_wildcard = true;
                            }
                            let negated = prev.is_some_and(|t| is_keyword(t, Keyword::NOT));
                            let escaped = token(i + 2).is_some_and(|t| is_keyword(t, Keyword::ESCAPE));
                            if word.keyword == Keyword::LIKE
                                && !negated
                                && !escaped
                                && !pattern.contains(['%', '_', '\\'])
                            {
                                profile.literal_likes.push(lexemes[i].offset);
                            }
                        }
                    }
                    Keyword::SET | Keyword::VALUES | Keyword::RETURNING => clause = Clause::Other,
                    _ => {}
                },
                _ => {}
            }
            i += 1;
        }
        profile
    }
}

/// Significant tokens of `sql` with their byte offsets
pub(crate) fn lex(sql: &str, dialect: SqlDialect) -> Result<Vec<Lexeme>, String> {
    let dialect = dialect.into_parser_dialect();
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize_with_location()
        .map_err(|e| e.to_string())?;
    let index = LineIndex::new(sql);
    Ok(tokens
        .into_iter()
        .filter(|t| !matches!(t.token, Token::Whitespace(_)))
        .map(|t| Lexeme {
            offset: index.offset(sql, t.span.start),
            token:  t.token
        })
        .collect())
}

/// Split a script into statements on top-level semicolons
pub(crate) fn split_statements(sql: &str, dialect: SqlDialect) -> Result<Vec<String>, String> {
    let lexemes = lex(sql, dialect)?;
    let mut statements = Vec::new();
    let mut start = 0;
    for lexeme in &lexemes {
        if matches!(lexeme.token, Token::SemiColon) {
            push_statement(&mut statements, &sql[start..lexeme.offset]);
            start = lexeme.offset + 1;
        }
    }
    push_statement(&mut statements, &sql[start..]);
    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        statements.push(text.to_string());
    }
}

/// Byte offsets of line starts, for mapping tokenizer locations
struct LineIndex {
    starts: Vec<usize>
}

impl LineIndex {
    fn new(sql: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            starts
        }
    }

    /// Locations are 1-based line and character column
    fn offset(&self, sql: &str, location: Location) -> usize {
        let line = usize::try_from(location.line).unwrap_or(0);
        let column = usize::try_from(location.column).unwrap_or(0);
        let Some(&start) = line.checked_sub(1).and_then(|l| self.starts.get(l)) else {
            return sql.len();
        };
        sql[start..]
            .char_indices()
            .nth(column.saturating_sub(1))
            .map_or(sql.len(), |(i, _)| start + i)
    }
}

fn is_keyword(token: &Token, keyword: Keyword) -> bool {
    matches!(token, Token::Word(w) if w.keyword == keyword && w.quote_style.is_none())
}

/// Keywords that carry statement structure and never name a column.
///
/// Everything else, including non-reserved words like `name` or `status`,
/// is treated as an identifier.
const STRUCTURAL: &[Keyword] = &[
    Keyword::SELECT,
    Keyword::FROM,
    Keyword::WHERE,
    Keyword::AND,
    Keyword::OR,
    Keyword::NOT,
    Keyword::NULL,
    Keyword::TRUE,
    Keyword::FALSE,
    Keyword::IS,
    Keyword::IN,
    Keyword::LIKE,
    Keyword::ILIKE,
    Keyword::BETWEEN,
    Keyword::ESCAPE,
    Keyword::EXISTS,
    Keyword::ON,
    Keyword::USING,
    Keyword::JOIN,
    Keyword::INNER,
    Keyword::LEFT,
    Keyword::RIGHT,
    Keyword::FULL,
    Keyword::OUTER,
    Keyword::CROSS,
    Keyword::NATURAL,
    Keyword::LATERAL,
    Keyword::ORDER,
    Keyword::GROUP,
    Keyword::BY,
    Keyword::HAVING,
    Keyword::LIMIT,
    Keyword::OFFSET,
    Keyword::FETCH,
    Keyword::FIRST,
    Keyword::LAST,
    Keyword::NEXT,
    Keyword::ROW,
    Keyword::ROWS,
    Keyword::ONLY,
    Keyword::ASC,
    Keyword::DESC,
    Keyword::NULLS,
    Keyword::UNION,
    Keyword::INTERSECT,
    Keyword::EXCEPT,
    Keyword::ALL,
    Keyword::ANY,
    Keyword::SOME,
    Keyword::DISTINCT,
    Keyword::AS,
    Keyword::CASE,
    Keyword::WHEN,
    Keyword::THEN,
    Keyword::ELSE,
    Keyword::END,
    Keyword::INTERVAL,
    Keyword::CURRENT_DATE,
    Keyword::CURRENT_TIME,
    Keyword::CURRENT_TIMESTAMP,
    Keyword::WITH,
    Keyword::INSERT,
    Keyword::INTO,
    Keyword::VALUES,
    Keyword::UPDATE,
    Keyword::SET,
    Keyword::DELETE,
    Keyword::RETURNING
];

fn is_identifier(word: &Word) -> bool {
    word.quote_style.is_some() || !STRUCTURAL.contains(&word.keyword)
}

/// Read `a`, `a.b` or `a.b.c` starting at `start`; returns the last segment
/// and the number of tokens consumed
fn column_ref(lexemes: &[Lexeme], start: usize) -> (String, usize) {
    let mut name = match &lexemes[start].token {
        Token::Word(w) => w.value.clone(),
        _ => String::new()
    };
    let mut consumed = 1;
    while let (Some(Token::Period), Some(Token::Word(w))) = (
        lexemes.get(start + consumed).map(|l| &l.token),
        lexemes.get(start + consumed + 1).map(|l| &l.token)
    ) {
        name = w.value.clone();
        consumed += 2;
    }
    (name, consumed)
}

fn is_comparison(token: &Token) -> bool {
    matches!(
        token,
        Token::Eq
            | Token::DoubleEq
            | Token::Neq
            | Token::Lt
            | Token::Gt
            | Token::LtEq
            | Token::GtEq
    )
}

/// Token that can follow a filtered column
fn is_predicate(token: &Token) -> bool {
    is_comparison(token)
        || [
            Keyword::LIKE,
            Keyword::ILIKE,
            Keyword::IN,
            Keyword::IS,
            Keyword::BETWEEN,
            Keyword::NOT
        ]
        .iter()
        .any(|&k| is_keyword(token, k))
}
