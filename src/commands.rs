//! Command execution.

use crate::config::Config;
use crate::Commands;
use colored::Colorize;
use flowdfa_core::{
    decode_json, decode_yaml, Automaton, Graph, HookRegistry, NextStates, StateDefinition,
};
use std::path::Path;
use std::sync::Arc;

/// Executes a one-shot command and returns the formatted output.
pub fn execute(cmd: Commands, config: &Config) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl { .. } => unreachable!(),

        Commands::Validate { file } => {
            let graph = load_graph(&file, config)?;
            let hooks = HookRegistry::new();
            Ok(describe_graph(&graph, &graph.unresolved_hooks(&hooks)))
        }

        Commands::Walk {
            file,
            from,
            next,
            path,
        } => {
            let graph = Arc::new(load_graph(&file, config)?);
            let hooks = Arc::new(hook_registry(&graph, config));
            let automaton = match from {
                Some(id) => {
                    Automaton::with_state(graph, hooks, StateDefinition::new(id).with_next(next))
                }
                None => Automaton::new(graph, hooks),
            };
            walk(&automaton, &path)
        }
    }
}

/// Reads and builds a graph from a YAML or JSON file.
pub fn load_graph(path: &Path, config: &Config) -> Result<Graph, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;

    let states = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => decode_json(&serde_json::from_str(&content)?)?,
        _ => decode_yaml(&content)?,
    };

    let graph = Graph::build_with(states, &config.graph)?;
    tracing::debug!("loaded graph from {}", path.display());
    Ok(graph)
}

/// Builds the hook registry used by the CLI. With hook tracing enabled, every
/// hook name the graph refers to logs the state it fires in.
pub fn hook_registry(graph: &Graph, config: &Config) -> HookRegistry {
    let hooks = HookRegistry::new();
    if config.hooks.trace {
        for name in graph.unresolved_hooks(&hooks) {
            let label = name.clone();
            hooks.register(name, move |a: &Automaton| {
                tracing::info!("hook '{}' fired at '{}'", label, a.current().id);
            });
        }
    }
    hooks
}

/// Applies each transfer in `path` in order, stopping at the first refusal.
pub fn walk(automaton: &Automaton, path: &[String]) -> Result<String, Box<dyn std::error::Error>> {
    let mut output = String::new();

    for target in path {
        let from = automaton.current().id.clone();
        if !automaton.transfer(target) {
            return Err(format!(
                "no transition from '{}' to '{}' (available: {})",
                from,
                target,
                format_next(&automaton.peek())
            )
            .into());
        }
        output.push_str(&format!("{} → {}\n", from, target.yellow()));
    }

    output.push_str(&format!(
        "{} {}\n",
        "Circulation:".bold(),
        automaton.circulation_ids().join(" → ")
    ));
    if automaton.is_final_state() {
        output.push_str(&format!("{}", "Final state reached".green()));
    } else {
        output.push_str(&format!("Next: {}", format_next(&automaton.peek())));
    }
    Ok(output)
}

/// Formats a graph summary with its diagnosis.
pub fn describe_graph(graph: &Graph, unresolved_hooks: &[String]) -> String {
    let mut output = format!(
        "{} {} states (checksum: {})\n",
        "Valid".green(),
        graph.len(),
        graph.checksum()
    );

    for id in graph.ids() {
        let Some(state) = graph.get(id) else {
            continue;
        };
        let marker = if state.is_start() {
            "start".cyan().to_string()
        } else if state.final_state {
            "final".cyan().to_string()
        } else {
            String::new()
        };
        let self_loop = if state.has_self_loop() { " (self-loop)" } else { "" };
        output.push_str(&format!(
            "  {:<12} {:<6} → [{}]{}\n",
            id,
            marker,
            state.next.join(", "),
            self_loop
        ));
    }

    for d in graph.diagnosis() {
        output.push_str(&format!("{}: {}\n", "Pruned".yellow(), d));
    }
    if !unresolved_hooks.is_empty() {
        output.push_str(&format!(
            "{}: {}\n",
            "Hooks".dimmed(),
            unresolved_hooks.join(", ")
        ));
    }

    output.trim_end().to_string()
}

pub fn format_next(next: &NextStates) -> String {
    if next.is_empty() {
        "none".dimmed().to_string()
    } else {
        next.ids().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    const DEMO: &str = include_str!("../demos/approval.yaml");

    fn demo_file() -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(DEMO.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_and_json() {
        let config = Config::default();
        let file = demo_file();
        let graph = load_graph(file.path(), &config).unwrap();
        assert_eq!(graph.len(), 5);

        let mut json = Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            json,
            r#"[{{"id": "a", "next": ["b"], "initial_state": true}}, {{"id": "b", "final_state": true}}]"#
        )
        .unwrap();
        let graph = load_graph(json.path(), &config).unwrap();
        assert_eq!(graph.ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_graph(Path::new("/nonexistent/graph.yaml"), &Config::default()).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_walk_to_final() {
        colored::control::set_override(false);
        let config = Config::default();
        let graph = Arc::new(load_graph(demo_file().path(), &config).unwrap());
        let hooks = Arc::new(hook_registry(&graph, &config));
        assert_eq!(hooks.len(), 7);

        let automaton = Automaton::new(graph, hooks);
        let path: Vec<String> = ["1", "2", "3", "end"].iter().map(|s| s.to_string()).collect();
        let output = walk(&automaton, &path).unwrap();

        assert!(output.contains("Circulation: start → 1 → 2 → 3 → end"));
        assert!(output.ends_with("Final state reached"));
    }

    #[test]
    fn test_walk_refused() {
        colored::control::set_override(false);
        let graph = Arc::new(load_graph(demo_file().path(), &Config::default()).unwrap());
        let automaton = Automaton::new(graph, Arc::new(HookRegistry::new()));

        let path = vec!["1".to_string(), "end".to_string()];
        let err = walk(&automaton, &path).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no transition from '1' to 'end' (available: 1, 2, 3)"
        );
    }

    #[test]
    fn test_describe_graph_reports_pruning() {
        colored::control::set_override(false);
        let graph = Graph::build(vec![
            StateDefinition::new("s").initial().with_next(["s", "e"]),
            StateDefinition::new("e").terminal(),
            StateDefinition::new("orphan").with_next(["e"]),
        ])
        .unwrap();

        let output = describe_graph(&graph, &["notify".to_string()]);
        assert!(output.starts_with("Valid 2 states"));
        assert!(output.contains("(self-loop)"));
        assert!(output.contains("Pruned: not all nodes are reachable: [orphan]"));
        assert!(output.ends_with("Hooks: notify"));
    }
}
