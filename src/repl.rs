//! Interactive REPL.

use crate::commands::{describe_graph, format_next, hook_registry, load_graph};
use crate::config::Config;
use colored::Colorize;
use flowdfa_core::{Automaton, Graph, HookRegistry};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config as EditorConfig, Editor};
use std::path::Path;
use std::sync::Arc;

const HELP_TEXT: &str = r#"
Available commands:
  help                 Show this help
  peek, p              List states reachable from the current state
  go, g <id>           Transfer to a reachable state
  current, c           Show the current state and its payload
  history, h           Show every state visited so far
  graph                Show the graph and its pruning diagnosis
  reset                Start over from the graph's start state

  quit, exit           Exit the REPL
"#;

/// A REPL session over one graph.
struct Session {
    graph: Arc<Graph>,
    hooks: Arc<HookRegistry>,
    automaton: Automaton,
}

impl Session {
    fn new(graph: Graph, hooks: HookRegistry) -> Self {
        let graph = Arc::new(graph);
        let hooks = Arc::new(hooks);
        let automaton = Automaton::new(graph.clone(), hooks.clone());
        Self {
            graph,
            hooks,
            automaton,
        }
    }

    fn reset(&mut self) {
        self.automaton = Automaton::new(self.graph.clone(), self.hooks.clone());
    }
}

pub fn run(file: &Path, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "flowdfa REPL".bold().cyan());

    let graph = load_graph(file, config)?;
    let hooks = hook_registry(&graph, config);
    println!(
        "Loaded {} ({} states, start '{}')",
        file.display(),
        graph.len(),
        graph.start().id
    );
    for d in graph.diagnosis() {
        println!("{}: {}", "Pruned".yellow(), d);
    }
    let mut session = Session::new(graph, hooks);

    // Create readline editor
    let editor_config = EditorConfig::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(editor_config)?;

    let history_path = config.repl.history_path();
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", format!("{}>", session.automaton.current().id).cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&mut session, line) {
                    Some(output) => println!("{}\n", output),
                    None => break, // Exit command
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

fn execute_repl_command(session: &mut Session, line: &str) -> Option<String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Some(String::new());
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];
    let automaton = &session.automaton;

    let output = match cmd.as_str() {
        "help" | "?" => HELP_TEXT.to_string(),

        "quit" | "exit" | "q" => return None,

        "peek" | "p" => format_next(&automaton.peek()),

        "go" | "g" => {
            let Some(target) = args.first() else {
                return Some("Usage: go <id>".to_string());
            };
            let from = automaton.current().id.clone();
            if automaton.transfer(target) {
                let mut out = format!("{} → {}", from, target.yellow());
                if automaton.is_final_state() {
                    out.push_str(&format!(" ({})", "final".green()));
                }
                out
            } else {
                format!(
                    "{}: no transition from '{}' to '{}' (available: {})",
                    "Refused".red(),
                    from,
                    target,
                    format_next(&automaton.peek())
                )
            }
        }

        "current" | "c" => {
            let state = automaton.current();
            let payload = serde_json::to_string_pretty(&state.payload)
                .unwrap_or_else(|_| state.payload.to_string());
            format!("{}\n  Payload: {}", state.id.cyan(), payload)
        }

        "history" | "h" => {
            let ids = automaton.circulation_ids();
            if ids.is_empty() {
                "No history".yellow().to_string()
            } else {
                ids.join(" → ")
            }
        }

        "graph" => describe_graph(&session.graph, &session.graph.unresolved_hooks(&session.hooks)),

        "reset" => {
            session.reset();
            format!("Reset to '{}'", session.graph.start().id)
        }

        _ => format!("Unknown command: {}. Type 'help' for help.", cmd),
    };

    Some(output)
}
