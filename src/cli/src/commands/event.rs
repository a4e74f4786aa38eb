//! Event commands.
//!
//! Create events, look them up by code, ask questions and toggle votes.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum EventCommands {
    /// Create a new event
    Create {
        /// Event title
        title: String,

        /// Request a specific code instead of a generated one
        #[arg(short, long)]
        code: Option<String>,
    },

    /// Show an event and its ranked questions
    Show {
        /// Event code
        code: String,
    },

    /// Ask a question
    Ask {
        /// Event ID
        event_id: Uuid,
        /// Question text
        text: String,
    },

    /// Cast a vote, or retract it if already cast
    Vote {
        /// Event ID
        event_id: Uuid,
        /// Question ID
        question_id: Uuid,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CreateEventRequest {
    title: String,
    code: Option<String>,
}

#[derive(Serialize)]
struct AskQuestionRequest {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventView {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub questions: Vec<QuestionView>,
    pub participant_count: usize,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: Uuid,
    pub text: String,
    pub votes: usize,
    pub voted: bool,
    pub asked_by_viewer: bool,
}

#[derive(Tabled)]
struct QuestionRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Votes")]
    votes: usize,
    #[tabled(rename = "You")]
    marker: &'static str,
    #[tabled(rename = "Question")]
    text: String,
    #[tabled(rename = "ID")]
    id: String,
}

fn marker(question: &QuestionView) -> &'static str {
    match (question.voted, question.asked_by_viewer) {
        (true, true) => "asked, voted",
        (true, false) => "voted",
        (false, true) => "asked",
        (false, false) => "",
    }
}

fn print_event(event: &EventView, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_header(&event.title);
            output::print_detail("Code", &event.code);
            output::print_detail("Event ID", &event.id.to_string());
            output::print_detail("Participants", &event.participant_count.to_string());
            println!();

            let rows: Vec<QuestionRow> = event
                .questions
                .iter()
                .enumerate()
                .map(|(i, q)| QuestionRow {
                    rank: i + 1,
                    votes: q.votes,
                    marker: marker(q),
                    text: q.text.clone(),
                    id: q.id.to_string(),
                })
                .collect();
            output::print_table(&rows);
            Ok(())
        }
        _ => output::print_item(event, format),
    }
}

pub async fn execute(cmd: EventCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        EventCommands::Create { title, code } => {
            let event: EventView = client
                .post("/api/v1/events", &CreateEventRequest { title, code })
                .await?;
            if let OutputFormat::Table = format {
                output::print_success(&format!("Event created, share code {}", event.code));
            }
            print_event(&event, format)
        }

        EventCommands::Show { code } => {
            let event: EventView = client.get(&format!("/api/v1/events/{}", code)).await?;
            print_event(&event, format)
        }

        EventCommands::Ask { event_id, text } => {
            let event: EventView = client
                .post(
                    &format!("/api/v1/events/{}/questions", event_id),
                    &AskQuestionRequest { text },
                )
                .await?;
            if let OutputFormat::Table = format {
                output::print_success("Question added");
            }
            print_event(&event, format)
        }

        EventCommands::Vote { event_id, question_id } => {
            let event: EventView = client
                .post_empty(&format!("/api/v1/events/{}/questions/{}/vote", event_id, question_id))
                .await?;
            if let OutputFormat::Table = format {
                let voted = event
                    .questions
                    .iter()
                    .find(|q| q.id == question_id)
                    .map(|q| q.voted)
                    .unwrap_or(false);
                output::print_success(if voted { "Vote cast" } else { "Vote retracted" });
            }
            print_event(&event, format)
        }
    }
}
