// ABOUTME: Interactive terminal chat — wires config, provider, session store, and ChatManager together.
// ABOUTME: Reads lines from stdin, streams replies to stdout, and reports the conversation size.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::attachment::AttachmentResolver;
use crate::chat::exchange::{ChatManager, ChatParams};
use crate::chat::provider::create_client;
use crate::chat::stream::ExchangeEvent;
use crate::config::Config;
use crate::schema::SchemaFields;

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    /// Blank line; nothing to send.
    Skip,
    Chat {
        text: String,
        /// `p,` prefix: ask for a photo reference before sending.
        ask_photo: bool,
        /// `i,` prefix: ask for new instructions before sending.
        ask_instructions: bool,
    },
}

/// Parse one input line. The `p,` and `i,` prefixes may be combined.
pub fn parse_command(line: &str) -> Command {
    let mut rest = line.trim();
    if rest.eq_ignore_ascii_case("exit") {
        return Command::Exit;
    }

    let mut ask_photo = false;
    let mut ask_instructions = false;
    loop {
        if let Some(tail) = rest.strip_prefix("p,") {
            ask_photo = true;
            rest = tail.trim_start();
        } else if let Some(tail) = rest.strip_prefix("i,") {
            ask_instructions = true;
            rest = tail.trim_start();
        } else {
            break;
        }
    }

    if rest.is_empty() && !ask_photo && !ask_instructions {
        return Command::Skip;
    }
    Command::Chat {
        text: rest.to_string(),
        ask_photo,
        ask_instructions,
    }
}

/// Load extra structured-output fields from a JSON file.
pub fn load_schema_fields(path: &Path) -> anyhow::Result<SchemaFields> {
    let content = std::fs::read_to_string(path)?;
    let fields: SchemaFields = serde_json::from_str(&content)?;
    Ok(fields)
}

/// Top-level application driving the interactive chat.
pub struct App {
    manager: Arc<ChatManager>,
    conversation_id: Option<String>,
    schema_fields: Option<SchemaFields>,
}

impl App {
    /// Build the provider, resolver and session store described by `config`.
    pub fn new(
        config: &Config,
        conversation_id: Option<String>,
        schema_fields: Option<SchemaFields>,
    ) -> anyhow::Result<Self> {
        let provider = create_client(&config.llm)?;
        let resolver = AttachmentResolver::new(config.attachment.fetch_timeout())?;
        let store = Arc::new(config.session.build_store());
        let manager = ChatManager::new(store, provider, resolver, config.llm.chat_defaults());

        Ok(Self {
            manager: Arc::new(manager),
            conversation_id,
            schema_fields,
        })
    }

    /// Run the read-send-print loop until `exit` or end of input.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Type a message. Prefix with 'p,' to attach a photo, 'i,' to set instructions, 'exit' to quit.");

        loop {
            let Some(line) = prompt(&mut lines, "> ").await? else {
                break;
            };
            let (text, ask_photo, ask_instructions) = match parse_command(&line) {
                Command::Exit => break,
                Command::Skip => continue,
                Command::Chat {
                    text,
                    ask_photo,
                    ask_instructions,
                } => (text, ask_photo, ask_instructions),
            };

            let mut params = ChatParams::new(text);
            if ask_photo {
                match prompt(&mut lines, "photo (url, path or base64): ").await? {
                    Some(reference) if !reference.trim().is_empty() => {
                        params = params.image(reference.trim());
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            if ask_instructions {
                match prompt(&mut lines, "instructions: ").await? {
                    Some(instructions) => params = params.instructions(instructions.trim()),
                    None => break,
                }
            }
            if let Some(id) = &self.conversation_id {
                params = params.conversation(id.clone());
            }
            if let Some(fields) = &self.schema_fields {
                params = params.schema_fields(fields.clone());
            }

            self.exchange(params).await?;
        }
        Ok(())
    }

    /// Send one message and print its reply as it streams in.
    async fn exchange(&mut self, params: ChatParams) -> anyhow::Result<()> {
        let (conversation_id, mut events) = self.manager.chat(params);
        self.conversation_id = Some(conversation_id.clone());

        let mut stdout = std::io::stdout();
        while let Some(event) = events.next().await {
            match event {
                ExchangeEvent::Delta { text, .. } => {
                    print!("{}", text);
                    stdout.flush()?;
                }
                ExchangeEvent::Completed { .. } => {
                    println!();
                    let size = self.manager.store().size_of(&conversation_id).await?;
                    println!("[{} | conversation size: {} bytes]", conversation_id, size);
                }
                ExchangeEvent::Failed { error, .. } => {
                    println!();
                    eprintln!("Error: {}", error);
                }
            }
        }
        Ok(())
    }
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> anyhow::Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?)
}
