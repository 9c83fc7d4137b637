//! A small recursive-descent parser for the DDL subset this engine needs
//! to track: `CREATE TABLE`, `ALTER TABLE ... ADD COLUMN`, `DROP TABLE`,
//! `TRUNCATE TABLE`. Restructured as a pure function per the re-architecture
//! note in the design notes: `parse(text, tables) -> (new_tables, affected_dbs)`
//! rather than a parser object mutating a shared catalog as it walks the
//! statement, so the caller (the Schema Registry) owns every mutation
//! explicitly.

use crate::ddl_history::DdlParser;
use crate::model::{ColumnDef, DataType, TableDef, TableId};

/// Statements the registry treats as transaction noise: never parsed,
/// never change the catalog, but still appended to history by the caller
/// so replay sees the same input stream.
pub fn is_ignored_statement(ddl_text: &str) -> bool {
    let trimmed = ddl_text.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    matches!(
        upper.as_str(),
        "BEGIN" | "START TRANSACTION" | "COMMIT" | "ROLLBACK" | "END"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Number(&'a str),
    LParen,
    RParen,
    Comma,
    Semicolon,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                tokens.push(Token::Number(&text[start..i]));
            }
            _ if c.is_alphanumeric() || c == '_' || c == '`' => {
                let start = i;
                while i < bytes.len() {
                    let ch = bytes[i] as char;
                    if ch.is_alphanumeric() || ch == '_' || ch == '`' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word = text[start..i].trim_matches('`');
                tokens.push(Token::Word(word));
            }
            _ => {
                // Skip any other punctuation (quotes, operators) we don't
                // need for this DDL subset.
                i += 1;
            }
        }
    }
    tokens
}

struct Cursor<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: Vec<Token<'a>>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token<'a>> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn expect_word(&mut self, expected: &str) -> Result<(), String> {
        match self.advance() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(expected) => Ok(()),
            other => Err(format!("expected '{expected}', found {other:?}")),
        }
    }

    fn peek_word_matches(&self, expected: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(expected))
    }

    fn consume_identifier(&mut self) -> Result<String, String> {
        match self.advance() {
            Some(Token::Word(w)) => Ok(w.to_string()),
            other => Err(format!("expected identifier, found {other:?}")),
        }
    }
}

fn parse_data_type(cursor: &mut Cursor) -> Result<(DataType, Option<u32>), String> {
    let word = match cursor.advance() {
        Some(Token::Word(w)) => w,
        other => return Err(format!("expected a data type, found {other:?}")),
    };
    let upper = word.to_uppercase();
    let (data_type, takes_length) = match upper.as_str() {
        "INT" | "INTEGER" | "BIGINT" => (DataType::Integer, false),
        "FLOAT" | "DOUBLE" | "REAL" | "DECIMAL" => (DataType::Float, false),
        "VARCHAR" => (DataType::Varchar, true),
        "TEXT" => (DataType::Text, false),
        "BOOLEAN" | "BOOL" => (DataType::Boolean, false),
        "JSON" => (DataType::Json, false),
        "DATE" => (DataType::Date, false),
        "DATETIME" | "TIMESTAMP" => (DataType::DateTime, false),
        other => return Err(format!("unknown data type '{other}'")),
    };

    let length = if takes_length && cursor.peek() == Some(Token::LParen) {
        cursor.advance();
        let len = match cursor.advance() {
            Some(Token::Number(n)) => n
                .parse::<u32>()
                .map_err(|_| format!("invalid length literal '{n}'"))?,
            other => return Err(format!("expected a length literal, found {other:?}")),
        };
        match cursor.advance() {
            Some(Token::RParen) => {}
            other => return Err(format!("expected ')', found {other:?}")),
        }
        Some(len)
    } else {
        None
    };

    Ok((data_type, length))
}

/// Column constraints following the type: `NOT NULL`, `NULL`, `PRIMARY KEY`,
/// `AUTO_INCREMENT`. Returns (nullable, primary_key, auto_increment).
fn parse_column_constraints(cursor: &mut Cursor) -> Result<(bool, bool, bool), String> {
    let mut nullable = true;
    let mut primary_key = false;
    let mut auto_increment = false;
    loop {
        match cursor.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("NOT") => {
                cursor.advance();
                cursor.expect_word("NULL")?;
                nullable = false;
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("NULL") => {
                cursor.advance();
                nullable = true;
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("PRIMARY") => {
                cursor.advance();
                cursor.expect_word("KEY")?;
                primary_key = true;
                nullable = false;
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("AUTO_INCREMENT") => {
                cursor.advance();
                auto_increment = true;
            }
            _ => break,
        }
    }
    Ok((nullable, primary_key, auto_increment))
}

fn parse_create_table(
    cursor: &mut Cursor,
    default_db: &str,
    tables: &[TableDef],
) -> Result<Vec<TableDef>, String> {
    cursor.expect_word("TABLE")?;

    let if_not_exists = if cursor.peek_word_matches("IF") {
        cursor.advance();
        cursor.expect_word("NOT")?;
        cursor.expect_word("EXISTS")?;
        true
    } else {
        false
    };

    let table_name = cursor.consume_identifier()?;
    let id = TableId::in_database(default_db, &table_name);

    if if_not_exists && tables.iter().any(|t| t.id == id) {
        return Ok(tables.to_vec());
    }

    match cursor.advance() {
        Some(Token::LParen) => {}
        other => return Err(format!("expected '(', found {other:?}")),
    }

    let mut columns = Vec::new();
    let mut primary_key = Vec::new();
    loop {
        let name = cursor.consume_identifier()?;
        let (data_type, length) = parse_data_type(cursor)?;
        let (nullable, is_primary_key, auto_increment) = parse_column_constraints(cursor)?;
        if is_primary_key {
            primary_key.push(name.clone());
        }
        columns.push(ColumnDef {
            name,
            data_type,
            length,
            scale: None,
            nullable,
            auto_increment,
            generated: false,
        });

        match cursor.peek() {
            Some(Token::Comma) => {
                cursor.advance();
            }
            _ => break,
        }
    }

    match cursor.advance() {
        Some(Token::RParen) => {}
        other => return Err(format!("expected ')', found {other:?}")),
    }

    let mut new_tables: Vec<TableDef> = tables.iter().filter(|t| t.id != id).cloned().collect();
    new_tables.push(TableDef::new(id, columns, primary_key));
    Ok(new_tables)
}

fn parse_alter_table(
    cursor: &mut Cursor,
    default_db: &str,
    tables: &[TableDef],
) -> Result<Vec<TableDef>, String> {
    cursor.expect_word("TABLE")?;
    let table_name = cursor.consume_identifier()?;
    let id = TableId::in_database(default_db, &table_name);

    let mut existing = tables
        .iter()
        .find(|t| t.id == id)
        .cloned()
        .ok_or_else(|| format!("unknown table '{table_name}' in ALTER TABLE"))?;

    cursor.expect_word("ADD")?;
    if cursor.peek_word_matches("COLUMN") {
        cursor.advance();
    }
    let name = cursor.consume_identifier()?;
    let (data_type, length) = parse_data_type(cursor)?;
    let (nullable, primary_key, auto_increment) = parse_column_constraints(cursor)?;
    existing.columns.push(ColumnDef {
        name: name.clone(),
        data_type,
        length,
        scale: None,
        nullable,
        auto_increment,
        generated: false,
    });
    if primary_key {
        existing.primary_key.push(name);
    }

    let mut new_tables: Vec<TableDef> = tables.iter().filter(|t| t.id != id).cloned().collect();
    new_tables.push(existing);
    Ok(new_tables)
}

fn parse_drop_table(
    cursor: &mut Cursor,
    default_db: &str,
    tables: &[TableDef],
) -> Result<Vec<TableDef>, String> {
    cursor.expect_word("TABLE")?;
    if cursor.peek_word_matches("IF") {
        cursor.advance();
        cursor.expect_word("EXISTS")?;
    }
    let table_name = cursor.consume_identifier()?;
    let id = TableId::in_database(default_db, &table_name);
    Ok(tables.iter().filter(|t| t.id != id).cloned().collect())
}

fn parse_truncate_table(cursor: &mut Cursor, tables: &[TableDef]) -> Result<Vec<TableDef>, String> {
    cursor.expect_word("TABLE")?;
    // TRUNCATE empties rows, not schema: the table definition is unchanged.
    let _ = cursor.consume_identifier()?;
    Ok(tables.to_vec())
}

/// Parses one DDL statement against the current table set, returning the
/// new table set and the single database it affected. This subset of DDL
/// never spans multiple databases in one statement, so `affected_dbs` is
/// always zero or one entries.
pub fn parse(
    ddl_text: &str,
    default_db: &str,
    tables: &[TableDef],
) -> Result<(Vec<TableDef>, Vec<String>), String> {
    let tokens = tokenize(ddl_text);
    let mut cursor = Cursor::new(tokens);

    let keyword = match cursor.advance() {
        Some(Token::Word(w)) => w.to_uppercase(),
        other => return Err(format!("expected a DDL keyword, found {other:?}")),
    };

    let new_tables = match keyword.as_str() {
        "CREATE" => parse_create_table(&mut cursor, default_db, tables)?,
        "ALTER" => parse_alter_table(&mut cursor, default_db, tables)?,
        "DROP" => parse_drop_table(&mut cursor, default_db, tables)?,
        "TRUNCATE" => parse_truncate_table(&mut cursor, tables)?,
        other => return Err(format!("unsupported DDL statement '{other}'")),
    };

    Ok((new_tables, vec![default_db.to_string()]))
}

/// Adapter implementing the `DdlParser` trait the DDL History replay path
/// needs, backed by the free function `parse` above.
pub struct SqlDdlParser;

impl DdlParser for SqlDdlParser {
    fn parse(
        &self,
        ddl_text: &str,
        default_db: &str,
        tables: &[TableDef],
    ) -> Result<(Vec<TableDef>, Vec<String>), String> {
        parse(ddl_text, default_db, tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_collects_columns_and_primary_key() {
        let (tables, dbs) = parse(
            "CREATE TABLE t(id INT PRIMARY KEY, v VARCHAR(32))",
            "db",
            &[],
        )
        .unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].columns.len(), 2);
        assert_eq!(tables[0].primary_key, vec!["id".to_string()]);
        assert_eq!(dbs, vec!["db".to_string()]);
    }

    #[test]
    fn alter_table_add_column_appends_to_existing_table() {
        let (tables, _) = parse("CREATE TABLE t(id INT PRIMARY KEY)", "db", &[]).unwrap();
        let (tables, _) = parse("ALTER TABLE t ADD c INT", "db", &tables).unwrap();
        assert_eq!(tables[0].columns.len(), 2);
        assert_eq!(tables[0].columns[1].name, "c");
    }

    #[test]
    fn drop_table_removes_it() {
        let (tables, _) = parse("CREATE TABLE t(id INT PRIMARY KEY)", "db", &[]).unwrap();
        let (tables, _) = parse("DROP TABLE t", "db", &tables).unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn truncate_table_is_a_schema_no_op() {
        let (tables, _) = parse("CREATE TABLE t(id INT PRIMARY KEY)", "db", &[]).unwrap();
        let (after, _) = parse("TRUNCATE TABLE t", "db", &tables).unwrap();
        assert_eq!(tables, after);
    }

    #[test]
    fn ignored_statements_are_recognized_case_insensitively() {
        assert!(is_ignored_statement("begin"));
        assert!(is_ignored_statement("COMMIT;"));
        assert!(!is_ignored_statement("CREATE TABLE t(id INT)"));
    }

    #[test]
    fn alter_on_unknown_table_is_an_error() {
        let err = parse("ALTER TABLE ghost ADD c INT", "db", &[]).unwrap_err();
        assert!(err.contains("unknown table"));
    }
}
