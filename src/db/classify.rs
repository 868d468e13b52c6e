//! Vendor error classification.
//!
//! Drivers report failures with their own codes (SQLSTATE, `ORA-nnnnn`, server
//! error numbers, socket error names). Each dialect maps those onto the fixed
//! [`ErrorClass`] taxonomy and renders a short, localized explanation.

use super::Dialect;
use crate::error::{ErrorClass, ExecutionError, SheetError};
use std::fmt;
use std::io::ErrorKind;

/// Language for user-facing messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    En,
    Kr,
}

impl Language {
    /// Parses a language tag. Unknown tags fall back to English.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "kr" | "ko" | "ko-kr" | "korean" => Self::Kr,
            _ => Self::En,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::En => write!(f, "en"),
            Self::Kr => write!(f, "kr"),
        }
    }
}

/// Maps a driver error onto the dialect's taxonomy.
pub(crate) fn classify(dialect: Dialect, error: &ExecutionError) -> ErrorClass {
    let code = error.code.as_deref().unwrap_or("");
    let message = error.message.as_str();

    // Socket-level failures look the same for every network dialect.
    match code {
        "ECONNREFUSED" | "ENOTFOUND" | "ECONNRESET" => return ErrorClass::Connection,
        "ETIMEOUT" => return ErrorClass::Timeout,
        _ => {}
    }

    match dialect {
        Dialect::SqlServer => match code {
            "ELOGIN" | "18456" => ErrorClass::Auth,
            "ESOCKET" | "ETIMEDOUT" => ErrorClass::Connection,
            "ENAME" | "4060" => ErrorClass::UnknownSchema,
            _ => ErrorClass::Generic,
        },
        Dialect::MySql => match code {
            "ER_ACCESS_DENIED_ERROR" | "1045" => ErrorClass::Auth,
            "ER_BAD_DB_ERROR" | "1049" => ErrorClass::UnknownSchema,
            "ETIMEDOUT" | "PROTOCOL_CONNECTION_LOST" => ErrorClass::Connection,
            _ => ErrorClass::Generic,
        },
        Dialect::Postgres => match code {
            "28P01" | "28000" => ErrorClass::Auth,
            "3D000" => ErrorClass::UnknownSchema,
            "57014" => ErrorClass::Timeout,
            "ETIMEDOUT" => ErrorClass::Connection,
            _ => ErrorClass::Generic,
        },
        Dialect::Oracle => {
            let has = |needle: &str| code == needle || message.contains(needle);
            if has("ORA-01017") {
                ErrorClass::Auth
            } else if ["ORA-12154", "ORA-12514", "ORA-12541", "ORA-12545", "DPI-1047", "ETIMEDOUT"]
                .iter()
                .any(|c| has(c))
            {
                ErrorClass::Connection
            } else {
                ErrorClass::Generic
            }
        }
        Dialect::Sqlite => {
            if code == "SQLITE_CANTOPEN" || message.contains("unable to open") {
                ErrorClass::Connection
            } else {
                ErrorClass::Generic
            }
        }
    }
}

struct Messages {
    login: &'static str,
    auth: &'static str,
    connection: &'static str,
    name: &'static str,
    database: &'static str,
    timeout: &'static str,
    error_suffix: &'static str,
}

const EN: Messages = Messages {
    login: "Database login failed: Check username or password.",
    auth: "Database authentication failed: Check username or password.",
    connection: "Database connection failed: Check server address and port.",
    name: "Database name error: Check database name.",
    database: "Database error: Check database name.",
    timeout: "Query execution timeout: Optimize query or increase timeout.",
    error_suffix: "Error:",
};

const KR: Messages = Messages {
    login: "데이터베이스 로그인 실패: 사용자명 또는 비밀번호를 확인하세요.",
    auth: "데이터베이스 인증 실패: 사용자명 또는 비밀번호를 확인하세요.",
    connection: "데이터베이스 연결 실패: 서버 주소와 포트를 확인하세요.",
    name: "데이터베이스 이름 오류: 데이터베이스 이름을 확인하세요.",
    database: "데이터베이스 오류: 데이터베이스 이름을 확인하세요.",
    timeout: "쿼리 실행 시간 초과: 쿼리를 최적화하거나 타임아웃을 늘려주세요.",
    error_suffix: "오류:",
};

/// Renders a classified error as a single localized line.
pub(crate) fn describe(dialect: Dialect, language: Language, error: &ExecutionError) -> String {
    let msg = match language {
        Language::En => &EN,
        Language::Kr => &KR,
    };

    if dialect == Dialect::Sqlite {
        if let Some(text) = sqlite_detail(error) {
            return text.to_string();
        }
    }

    match (dialect, error.class) {
        (Dialect::SqlServer, ErrorClass::Auth) => msg.login.to_string(),
        (Dialect::SqlServer, ErrorClass::UnknownSchema) => msg.name.to_string(),
        (_, ErrorClass::Auth) => msg.auth.to_string(),
        (_, ErrorClass::Connection) => msg.connection.to_string(),
        (_, ErrorClass::UnknownSchema) => msg.database.to_string(),
        (_, ErrorClass::Timeout) => msg.timeout.to_string(),
        (_, ErrorClass::Generic) => {
            format!("{} {} {}", vendor_label(dialect), msg.error_suffix, error.message)
        }
    }
}

fn vendor_label(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::SqlServer => "MSSQL",
        Dialect::MySql => "MySQL",
        Dialect::Postgres => "PostgreSQL",
        Dialect::Oracle => "Oracle",
        Dialect::Sqlite => "SQLite",
    }
}

fn sqlite_detail(error: &ExecutionError) -> Option<&'static str> {
    match error.code.as_deref() {
        Some("SQLITE_CANTOPEN") => {
            Some("SQLite Error: Cannot open database file. Check file path and permissions.")
        }
        Some("SQLITE_CORRUPT") => Some("SQLite Error: Database file is corrupted."),
        Some("SQLITE_NOTADB") => Some("SQLite Error: File is not a database file."),
        Some("SQLITE_READONLY") => Some("SQLite Error: Database is read-only."),
        _ if error.message.contains("unable to open") => {
            Some("SQLite Error: Cannot open database file. Check file path and permissions.")
        }
        _ => None,
    }
}

/// Converts a sqlx error into an unclassified [`ExecutionError`] carrying the
/// most specific native code available.
pub fn map_sqlx_error(dialect: Dialect, error: sqlx::Error, sql: &str) -> SheetError {
    let code = match &error {
        sqlx::Error::Database(db) => database_code(dialect, db.as_ref()),
        sqlx::Error::Io(io) => io_code(dialect, io),
        sqlx::Error::PoolTimedOut => Some("ETIMEDOUT".to_string()),
        sqlx::Error::Tls(_) => Some("ECONNREFUSED".to_string()),
        _ => None,
    };

    let message = match error.as_database_error() {
        Some(db) => db.message().to_string(),
        None => error.to_string(),
    };

    ExecutionError::new(code, message, sql).into()
}

fn database_code(dialect: Dialect, db: &dyn sqlx::error::DatabaseError) -> Option<String> {
    match dialect {
        Dialect::MySql => {
            if let Some(my) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                let name = match my.number() {
                    1045 => "ER_ACCESS_DENIED_ERROR".to_string(),
                    1049 => "ER_BAD_DB_ERROR".to_string(),
                    n => n.to_string(),
                };
                return Some(name);
            }
            db.code().map(|c| c.into_owned())
        }
        Dialect::Sqlite => db.code().map(|c| sqlite_code_name(&c)),
        _ => db.code().map(|c| c.into_owned()),
    }
}

/// SQLite reports (extended) result codes as numbers.
fn sqlite_code_name(code: &str) -> String {
    let primary = code.parse::<i32>().map(|n| n & 0xff).ok();
    match primary {
        Some(14) => "SQLITE_CANTOPEN".to_string(),
        Some(11) => "SQLITE_CORRUPT".to_string(),
        Some(26) => "SQLITE_NOTADB".to_string(),
        Some(8) => "SQLITE_READONLY".to_string(),
        _ => code.to_string(),
    }
}

pub(crate) fn io_code(dialect: Dialect, io: &std::io::Error) -> Option<String> {
    let code = match io.kind() {
        ErrorKind::ConnectionRefused => "ECONNREFUSED",
        ErrorKind::TimedOut => "ETIMEDOUT",
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof => {
            if dialect == Dialect::MySql {
                "PROTOCOL_CONNECTION_LOST"
            } else {
                "ECONNRESET"
            }
        }
        _ if io.to_string().contains("lookup") => "ENOTFOUND",
        _ => return None,
    };
    Some(code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn err(code: Option<&str>, message: &str) -> ExecutionError {
        ExecutionError::new(code.map(String::from), message, "SELECT 1")
    }

    #[test]
    fn test_postgres_codes() {
        assert_eq!(classify(Dialect::Postgres, &err(Some("28P01"), "x")), ErrorClass::Auth);
        assert_eq!(
            classify(Dialect::Postgres, &err(Some("3D000"), "x")),
            ErrorClass::UnknownSchema
        );
        assert_eq!(
            classify(Dialect::Postgres, &err(Some("57014"), "canceling statement due to statement timeout")),
            ErrorClass::Timeout
        );
        assert_eq!(
            classify(Dialect::Postgres, &err(Some("ENOTFOUND"), "x")),
            ErrorClass::Connection
        );
        assert_eq!(
            classify(Dialect::Postgres, &err(Some("42P01"), "x")),
            ErrorClass::Generic
        );
    }

    #[test]
    fn test_mysql_codes() {
        assert_eq!(
            classify(Dialect::MySql, &err(Some("ER_ACCESS_DENIED_ERROR"), "x")),
            ErrorClass::Auth
        );
        assert_eq!(
            classify(Dialect::MySql, &err(Some("PROTOCOL_CONNECTION_LOST"), "x")),
            ErrorClass::Connection
        );
        assert_eq!(
            classify(Dialect::MySql, &err(Some("ER_BAD_DB_ERROR"), "x")),
            ErrorClass::UnknownSchema
        );
    }

    #[test]
    fn test_sqlserver_codes() {
        assert_eq!(classify(Dialect::SqlServer, &err(Some("ELOGIN"), "x")), ErrorClass::Auth);
        assert_eq!(
            classify(Dialect::SqlServer, &err(Some("ESOCKET"), "x")),
            ErrorClass::Connection
        );
        assert_eq!(
            classify(Dialect::SqlServer, &err(Some("ETIMEOUT"), "x")),
            ErrorClass::Timeout
        );
    }

    #[test]
    fn test_oracle_matches_message_text() {
        let e = err(None, "ORA-01017: invalid username/password; logon denied");
        assert_eq!(classify(Dialect::Oracle, &e), ErrorClass::Auth);
        let e = err(None, "ORA-12541: TNS:no listener");
        assert_eq!(classify(Dialect::Oracle, &e), ErrorClass::Connection);
    }

    #[test]
    fn test_describe_localizes() {
        let e = err(Some("28P01"), "x").with_class(ErrorClass::Auth);
        assert_eq!(
            describe(Dialect::Postgres, Language::En, &e),
            "Database authentication failed: Check username or password."
        );
        assert!(describe(Dialect::Postgres, Language::Kr, &e).contains("인증"));

        let e = err(Some("ELOGIN"), "x").with_class(ErrorClass::Auth);
        assert!(describe(Dialect::SqlServer, Language::En, &e).starts_with("Database login failed"));
    }

    #[test]
    fn test_describe_generic_keeps_driver_message() {
        let e = err(None, "relation \"nope\" does not exist");
        assert_eq!(
            describe(Dialect::Postgres, Language::En, &e),
            "PostgreSQL Error: relation \"nope\" does not exist"
        );
    }

    #[test]
    fn test_sqlite_code_names() {
        assert_eq!(sqlite_code_name("14"), "SQLITE_CANTOPEN");
        assert_eq!(sqlite_code_name("1032"), "SQLITE_READONLY");
        assert_eq!(sqlite_code_name("1"), "1");
        let e = err(Some("SQLITE_NOTADB"), "file is not a database");
        assert_eq!(
            describe(Dialect::Sqlite, Language::En, &e),
            "SQLite Error: File is not a database file."
        );
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("KR"), Language::Kr);
        assert_eq!(Language::parse("ko"), Language::Kr);
        assert_eq!(Language::parse("fr"), Language::En);
    }
}
