//! Structured notes tool.
//!
//! Notes are JSON files with a consistent schema so they can be listed,
//! searched, and read back cheaply: list/search return lightweight
//! summaries, full content only comes back on an explicit read. Long-form
//! material goes through `write_report` (a markdown file under the research
//! tree plus a source note pointing at it), and `write_meta` stores the
//! session's meta-reflection in the session directory — write-only by
//! design, so an agent can never read another session's reflections.
//!
//! In retrodict mode the orchestrator points the whole tree at a
//! session-scoped temporary directory, preventing notes written by
//! future-dated sessions from influencing past-date reasoning.

use crate::tools::{Tool, opt_str_arg, str_arg, tool};
use crate::{Error, Result};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Kinds of notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    /// Web search findings, collected sources
    Research,
    /// Key facts discovered during research
    Finding,
    /// Fermi estimates, calculations, quantitative analysis
    Estimate,
    /// Logical analysis, factor assessment, arguments
    Reasoning,
    /// Reference to an external source with summary
    Source,
}

impl NoteType {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "research" => Ok(NoteType::Research),
            "finding" => Ok(NoteType::Finding),
            "estimate" => Ok(NoteType::Estimate),
            "reasoning" => Ok(NoteType::Reasoning),
            "source" => Ok(NoteType::Source),
            other => Err(Error::invalid_input(format!(
                "Unknown note type: {other}. Use research, finding, estimate, \
                 reasoning, or source."
            ))),
        }
    }
}

/// A structured note with metadata for searchability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    /// Short topic/title for the note.
    pub topic: String,
    /// 1-2 sentence summary, always shown in search results.
    pub summary: String,
    /// Full details, only returned on explicit read.
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
    /// Confidence level for estimates, 0-1.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub question_id: Option<u64>,
    /// Path to a detailed markdown report, if any.
    #[serde(default)]
    pub report_path: Option<String>,
    pub created_at: String,
}

impl Note {
    fn summary_value(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.note_type,
            "topic": self.topic,
            "summary": self.summary,
            "question_id": self.question_id,
            "has_report": self.report_path.is_some(),
        })
    }
}

fn new_note_id() -> String {
    let bytes: [u8; 6] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn slugify(text: &str, max_length: usize) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut collapsed = String::with_capacity(slug.len());
    let mut last_dash = true;
    for c in slug.chars() {
        if c == '-' {
            if !last_dash {
                collapsed.push(c);
            }
            last_dash = true;
        } else {
            collapsed.push(c);
            last_dash = false;
        }
    }
    collapsed.trim_matches('-').chars().take(max_length).collect()
}

/// Directory layout the notes tool operates on.
#[derive(Debug, Clone)]
pub struct NotesPaths {
    /// Structured JSON notes: `<base>/structured/<id>.json`.
    pub structured: PathBuf,
    /// Session directory for meta-reflections: `<base>/sessions/<post_id>/<ts>/`.
    pub session: Option<PathBuf>,
    /// Research directory for long-form reports: `<base>/research/<post_id>/<ts>/`.
    pub research: PathBuf,
}

impl NotesPaths {
    /// Layout for one session rooted at `base` (the live notes tree, or the
    /// retrodict temp tree).
    pub fn for_session(base: &Path, post_id: u64) -> Self {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self {
            structured: base.join("structured"),
            session: Some(
                base.join("sessions")
                    .join(post_id.to_string())
                    .join(&timestamp),
            ),
            research: base.join("research").join(post_id.to_string()).join(timestamp),
        }
    }
}

async fn load_all_notes(dir: &Path) -> Vec<Note> {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut notes = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => match serde_json::from_str::<Note>(&body) {
                Ok(note) => notes.push(note),
                Err(e) => log::warn!("Skipping malformed note {}: {e}", path.display()),
            },
            Err(e) => log::warn!("Cannot read note {}: {e}", path.display()),
        }
    }
    notes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    notes
}

async fn save_note(dir: &Path, note: &Note) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.json", note.id));
    tokio::fs::write(&path, serde_json::to_string_pretty(note)?).await?;
    Ok(path)
}

async fn handle_list(paths: &NotesPaths, args: &Value) -> Result<Value> {
    let type_filter = opt_str_arg(args, "type").map(NoteType::parse).transpose()?;
    let question_filter = args.get("question_id").and_then(|v| v.as_u64());

    let notes = load_all_notes(&paths.structured).await;
    let summaries: Vec<Value> = notes
        .iter()
        .filter(|n| type_filter.map(|t| n.note_type == t).unwrap_or(true))
        .filter(|n| {
            question_filter
                .map(|q| n.question_id == Some(q))
                .unwrap_or(true)
        })
        .map(|n| n.summary_value())
        .collect();

    Ok(json!({"count": summaries.len(), "notes": summaries}))
}

async fn handle_search(paths: &NotesPaths, args: &Value) -> Result<Value> {
    let query = str_arg(args, "query")?.to_lowercase();
    let terms: Vec<&str> = query.split_whitespace().collect();

    let notes = load_all_notes(&paths.structured).await;
    let mut scored: Vec<(usize, Value)> = notes
        .iter()
        .filter_map(|note| {
            let haystack = format!("{} {} {}", note.topic, note.summary, note.content)
                .to_lowercase();
            let count = terms.iter().filter(|t| haystack.contains(**t)).count();
            (count > 0).then(|| {
                let mut summary = note.summary_value();
                summary["match_count"] = json!(count);
                (count, summary)
            })
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let results: Vec<Value> = scored.into_iter().map(|(_, v)| v).collect();
    Ok(json!({"count": results.len(), "notes": results}))
}

async fn handle_read(paths: &NotesPaths, args: &Value) -> Result<Value> {
    let id = str_arg(args, "id")?;
    let path = paths.structured.join(format!("{id}.json"));
    let body = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| Error::tool(format!("Note not found: {id}")))?;
    let note: Note = serde_json::from_str(&body)?;
    Ok(serde_json::to_value(&note)?)
}

async fn handle_write(paths: &NotesPaths, args: &Value) -> Result<Value> {
    let note_type = NoteType::parse(str_arg(args, "type")?)?;
    let note = Note {
        id: new_note_id(),
        note_type,
        topic: str_arg(args, "topic")?.to_string(),
        summary: str_arg(args, "summary")?.to_string(),
        content: str_arg(args, "content")?.to_string(),
        sources: args
            .get("sources")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        confidence: args.get("confidence").and_then(|v| v.as_f64()),
        question_id: args.get("question_id").and_then(|v| v.as_u64()),
        report_path: None,
        created_at: Utc::now().to_rfc3339(),
    };

    let path = save_note(&paths.structured, &note).await?;
    Ok(json!({"id": note.id, "path": path.display().to_string()}))
}

async fn handle_write_meta(paths: &NotesPaths, args: &Value) -> Result<Value> {
    let content = str_arg(args, "content")?;
    let session_dir = paths
        .session
        .as_ref()
        .ok_or_else(|| Error::tool("write_meta is not available in this session"))?;

    tokio::fs::create_dir_all(session_dir).await?;
    let path = session_dir.join("meta.md");
    tokio::fs::write(&path, content).await?;
    Ok(json!({"path": path.display().to_string()}))
}

async fn handle_write_report(paths: &NotesPaths, args: &Value) -> Result<Value> {
    let title = str_arg(args, "title")?.to_string();
    let content = str_arg(args, "content")?;

    tokio::fs::create_dir_all(&paths.research).await?;
    let report_path = paths
        .research
        .join(format!("{}.md", slugify(&title, 50)));
    tokio::fs::write(&report_path, content).await?;

    // A source note makes the report discoverable via list/search.
    let note = Note {
        id: new_note_id(),
        note_type: NoteType::Source,
        topic: title.clone(),
        summary: opt_str_arg(args, "summary")
            .unwrap_or("Long-form research report")
            .to_string(),
        content: format!("Report: {title}"),
        sources: Vec::new(),
        confidence: None,
        question_id: args.get("question_id").and_then(|v| v.as_u64()),
        report_path: Some(report_path.display().to_string()),
        created_at: Utc::now().to_rfc3339(),
    };
    save_note(&paths.structured, &note).await?;

    Ok(json!({
        "id": note.id,
        "report_path": report_path.display().to_string(),
    }))
}

/// Build the `notes` tool over the given layout.
pub fn notes_tool(paths: NotesPaths) -> Tool {
    tool(
        "notes",
        "Manage notes for forecasting research. Modes: 'list' (summaries, filter by \
         type/question_id), 'search' (find notes by query), 'read' (full note by id), \
         'write' (create a structured note: type, topic, summary, content, optional \
         sources/confidence/question_id), 'write_meta' (session meta-reflection, \
         write-only), 'write_report' (long-form markdown report: title, content).",
    )
    .schema(json!({
        "mode": {"type": "string"},
        "type": {"type": "string", "optional": true},
        "topic": {"type": "string", "optional": true},
        "summary": {"type": "string", "optional": true},
        "content": {"type": "string", "optional": true},
        "sources": {"type": "array", "optional": true},
        "confidence": {"type": "number", "optional": true},
        "question_id": {"type": "integer", "optional": true},
        "query": {"type": "string", "optional": true},
        "id": {"type": "string", "optional": true},
        "title": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let paths = paths.clone();
        async move {
            let mode = str_arg(&args, "mode")?;
            match mode {
                "list" => handle_list(&paths, &args).await,
                "search" => handle_search(&paths, &args).await,
                "read" => handle_read(&paths, &args).await,
                "write" => handle_write(&paths, &args).await,
                "write_meta" => handle_write_meta(&paths, &args).await,
                "write_report" => handle_write_report(&paths, &args).await,
                other => Err(Error::invalid_input(format!(
                    "Unknown mode: {other}. Use 'list', 'search', 'read', 'write', \
                     'write_meta', or 'write_report'."
                ))),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> NotesPaths {
        NotesPaths::for_session(dir.path(), 42)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);

        let written = handle_write(
            &p,
            &json!({
                "type": "finding",
                "topic": "Tesla Q1 base rate",
                "summary": "Historical delivery beats",
                "content": "Tesla beat guidance in 6 of the last 10 quarters.",
                "question_id": 42
            }),
        )
        .await
        .unwrap();
        let id = written["id"].as_str().unwrap();

        let read = handle_read(&p, &json!({"id": id})).await.unwrap();
        assert_eq!(read["topic"], "Tesla Q1 base rate");
        assert_eq!(read["type"], "finding");
        assert_eq!(read["question_id"], 42);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);

        for (note_type, qid) in [("finding", 1), ("estimate", 2), ("finding", 2)] {
            handle_write(
                &p,
                &json!({
                    "type": note_type,
                    "topic": "t",
                    "summary": "s",
                    "content": "c",
                    "question_id": qid
                }),
            )
            .await
            .unwrap();
        }

        let all = handle_list(&p, &json!({})).await.unwrap();
        assert_eq!(all["count"], 3);

        let findings = handle_list(&p, &json!({"type": "finding"})).await.unwrap();
        assert_eq!(findings["count"], 2);

        let q2 = handle_list(&p, &json!({"question_id": 2})).await.unwrap();
        assert_eq!(q2["count"], 2);

        // Summaries never leak full content
        assert!(all["notes"][0].get("content").is_none());
    }

    #[tokio::test]
    async fn test_search_ranks_by_match_count() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);

        handle_write(
            &p,
            &json!({
                "type": "research",
                "topic": "Tesla deliveries",
                "summary": "Tesla delivery numbers",
                "content": "Tesla Tesla Tesla"
            }),
        )
        .await
        .unwrap();
        handle_write(
            &p,
            &json!({
                "type": "research",
                "topic": "SpaceX launches",
                "summary": "Launch cadence",
                "content": "Mentions tesla once"
            }),
        )
        .await
        .unwrap();

        let results = handle_search(&p, &json!({"query": "tesla deliveries"}))
            .await
            .unwrap();
        assert_eq!(results["count"], 2);
        assert_eq!(results["notes"][0]["topic"], "Tesla deliveries");
    }

    #[tokio::test]
    async fn test_write_meta_requires_session_dir() {
        let dir = TempDir::new().unwrap();
        let mut p = paths(&dir);

        let ok = handle_write_meta(&p, &json!({"content": "# Reflection"}))
            .await
            .unwrap();
        let meta_path = PathBuf::from(ok["path"].as_str().unwrap());
        assert!(meta_path.ends_with("meta.md"));
        assert!(meta_path.exists());

        p.session = None;
        assert!(
            handle_write_meta(&p, &json!({"content": "x"}))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_write_report_creates_note_pointer() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);

        let result = handle_write_report(
            &p,
            &json!({
                "title": "NYC Funding Analysis!",
                "content": "# Report body",
                "question_id": 7
            }),
        )
        .await
        .unwrap();

        let report_path = PathBuf::from(result["report_path"].as_str().unwrap());
        assert!(report_path.exists());
        assert!(
            report_path
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("nyc-funding-analysis")
        );

        // The pointer note is searchable
        let found = handle_search(&p, &json!({"query": "funding"})).await.unwrap();
        assert_eq!(found["count"], 1);
        assert_eq!(found["notes"][0]["has_report"], true);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("NYC Funding Analysis!", 50), "nyc-funding-analysis");
        assert_eq!(slugify("  --weird   input--  ", 50), "weird-input");
        assert_eq!(slugify("abcdef", 3), "abc");
    }

    #[test]
    fn test_note_type_parse() {
        assert_eq!(NoteType::parse("finding").unwrap(), NoteType::Finding);
        assert!(NoteType::parse("diary").is_err());
    }
}
