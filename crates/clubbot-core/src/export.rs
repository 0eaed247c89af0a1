//! Tabular renditions of the user store.

use std::{fmt, fs, path::Path, str::FromStr};

use crate::{errors::Error, store::UserRecord, Result};

pub const COLUMNS: [&str; 5] = ["user_id", "username", "first_name", "last_name", "joined_utc"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Tsv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
        }
    }

    pub fn render(self, users: &[UserRecord]) -> Result<String> {
        match self {
            Self::Csv => Ok(render_delimited(users, ',', csv_field)),
            Self::Tsv => Ok(render_delimited(users, '\t', tsv_field)),
            Self::Json => Ok(serde_json::to_string_pretty(users)?),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!("unknown export format: {other}"))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Render and write `users` to `path`. Returns the number of rows written.
pub fn write_export(path: &Path, format: ExportFormat, users: &[UserRecord]) -> Result<usize> {
    let body = format.render(users)?;
    fs::write(path, body)?;
    Ok(users.len())
}

fn render_delimited(users: &[UserRecord], sep: char, field: fn(&str) -> String) -> String {
    let mut out = String::new();
    push_row(&mut out, sep, COLUMNS.into_iter().map(field));
    for u in users {
        let id = u.user_id.to_string();
        push_row(
            &mut out,
            sep,
            [
                id.as_str(),
                u.username.as_str(),
                u.first_name.as_str(),
                u.last_name.as_str(),
                u.joined_utc.as_str(),
            ]
            .into_iter()
            .map(field),
        );
    }
    out
}

fn push_row(out: &mut String, sep: char, fields: impl Iterator<Item = String>) {
    for (i, f) in fields.enumerate() {
        if i > 0 {
            out.push(sep);
        }
        out.push_str(&f);
    }
    out.push_str("\r\n");
}

// RFC 4180: quote when the field holds a comma, quote, CR or LF; double inner quotes.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn tsv_field(value: &str) -> String {
    value.replace(['\t', '\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, username: &str, first: &str) -> UserRecord {
        UserRecord {
            user_id: id,
            username: username.to_string(),
            first_name: first.to_string(),
            last_name: String::new(),
            joined_utc: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn parses_formats_with_csv_default() {
        assert_eq!("".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("TSV".parse::<ExportFormat>().unwrap(), ExportFormat::Tsv);
        assert_eq!(" json ".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn csv_quotes_special_fields() {
        let out = ExportFormat::Csv
            .render(&[user(1, "a,b", "say \"hi\"")])
            .unwrap();
        let mut lines = out.split("\r\n");
        assert_eq!(lines.next(), Some("user_id,username,first_name,last_name,joined_utc"));
        assert_eq!(
            lines.next(),
            Some("1,\"a,b\",\"say \"\"hi\"\"\",,2026-01-01T00:00:00Z")
        );
    }

    #[test]
    fn tsv_flattens_tabs_and_newlines() {
        let out = ExportFormat::Tsv.render(&[user(7, "x\ty", "line\nbreak")]).unwrap();
        let row = out.split("\r\n").nth(1).unwrap();
        assert_eq!(row, "7\tx y\tline break\t\t2026-01-01T00:00:00Z");
    }

    #[test]
    fn json_is_array_of_objects() {
        let out = ExportFormat::Json.render(&[user(1, "a", "A"), user(2, "b", "B")]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[1]["user_id"], 2);
        assert_eq!(arr[0]["username"], "a");
    }

    #[test]
    fn write_export_creates_file() {
        let dir = crate::store::tests::tmp_dir("clubbot-export");
        let path = dir.join("out.csv");
        assert_eq!(write_export(&path, ExportFormat::Csv, &[user(1, "a", "A")]).unwrap(), 1);
        assert!(fs::read_to_string(&path).unwrap().starts_with("user_id,"));
        let _ = fs::remove_dir_all(&dir);
    }
}
