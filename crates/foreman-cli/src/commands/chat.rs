use futures::StreamExt;
use std::io::Write;
use tokio::io::AsyncBufReadExt;

use foreman_core::{Context, Result, Role, StreamEvent};
use foreman_runtime::ChatService;

/// Who the chat talks as.
pub(super) struct Scope {
    pub session: String,
    pub customer: Option<String>,
    pub user: Option<String>,
    pub workspace: Option<String>,
}

impl Scope {
    fn context(&self) -> Context {
        Context {
            session_id: Some(self.session.clone()),
            user_id: self.user.clone(),
            customer_id: self.customer.clone(),
            workspace_id: self.workspace.clone(),
        }
    }
}

pub(super) async fn cmd_chat(service: ChatService, scope: Scope, stream: bool) -> Result<()> {
    let ctx = scope.context();
    println!("Foreman chat, session {}", scope.session);
    println!("   Type 'exit' or Ctrl+D to quit");
    println!();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("\x1b[36myou>\x1b[0m ");
        std::io::stderr().flush().ok();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }

        if stream {
            let mut events = service.stream_turn(&ctx, trimmed).await?;
            while let Some(event) = events.next().await {
                print_event(&event);
            }
            println!();
        } else {
            let reply = service.run_turn(&ctx, trimmed).await?;
            println!("\x1b[32mforeman>\x1b[0m {reply}");
        }
    }
    Ok(())
}

fn print_event(event: &StreamEvent) {
    if event.is_boundary && event.role == Role::Ai && !event.content_delta.is_empty() {
        println!();
        eprint!("\x1b[32m{}>\x1b[0m ", label(event));
    }
    match event.role {
        Role::Tool => {
            eprintln!("\n\x1b[90m   ✓ {}\x1b[0m", truncate(&event.content_delta, 200));
        }
        _ if event.is_diagnostic() => {
            eprintln!("\n\x1b[31m   ❌ {}\x1b[0m", event.content_delta);
        }
        _ => {
            print!("{}", event.content_delta);
            std::io::stdout().flush().ok();
        }
    }
}

fn label(event: &StreamEvent) -> String {
    match event.node_path.as_slice() {
        [] | [_] => "foreman".to_string(),
        path => path[1..].join("/"),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &[&str]) -> StreamEvent {
        StreamEvent {
            node_path: path.iter().map(|s| s.to_string()).collect(),
            role: Role::Ai,
            content_delta: "x".into(),
            tool_call_deltas: vec![],
            tool_call_id: None,
            is_boundary: true,
        }
    }

    #[test]
    fn test_label_names_nested_agent() {
        assert_eq!(label(&event(&["supervisor"])), "foreman");
        assert_eq!(label(&event(&["supervisor", "survey_agent"])), "survey_agent");
        assert_eq!(
            label(&event(&["supervisor", "integration_agent", "mapping_agent"])),
            "integration_agent/mapping_agent"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel…");
    }

    #[test]
    fn test_scope_context() {
        let scope = Scope {
            session: "s1".into(),
            customer: Some("c1".into()),
            user: None,
            workspace: None,
        };
        let ctx = scope.context();
        assert_eq!(ctx.session_id.as_deref(), Some("s1"));
        assert_eq!(ctx.customer_id.as_deref(), Some("c1"));
    }
}
