use crate::classifier::ModelKind;
use crate::dashboard::{
    render_accuracies, render_analysis, render_controls, render_gallery, render_history, Controls,
    Dashboard,
};
use crate::session::{Session, DEFAULT_EXPORT_FILE};
use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::{
    io::{BufRead, Write},
    path::PathBuf,
    str::FromStr,
};
use tracing::info;

const HELP: &str = "\
  set <feature> <value>   change a measurement (sepal_length, sepal_width, petal_length, petal_width)
  model <knn|logistic>    pick the model
  show                    show the current controls
  analyze                 retrain, then classify the current measurements
  history                 list this session's predictions
  export [file]           write the history as csv (default prediction_history.csv)
  clear                   forget this session's predictions
  gallery                 list the species images
  help                    this text
  quit                    leave";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { feature: String, value: f64 },
    Model(ModelKind),
    Show,
    Analyze,
    History,
    Export(PathBuf),
    Clear,
    Gallery,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("").to_ascii_lowercase();
        let rest: Vec<&str> = words.collect();

        let parsed = match (command.as_str(), rest.as_slice()) {
            ("set", [feature, value]) => Command::Set {
                feature: feature.to_string(),
                value: value
                    .parse()
                    .with_context(|| format!("'{}' is not a number", value))?,
            },
            ("set", _) => bail!("usage: set <feature> <value>"),
            ("model", [_, ..]) => Command::Model(rest.join(" ").parse()?),
            ("model", []) => bail!("usage: model <knn|logistic>"),
            ("show", []) => Command::Show,
            ("analyze" | "predict", []) => Command::Analyze,
            ("history", []) => Command::History,
            ("export", []) => Command::Export(PathBuf::from(DEFAULT_EXPORT_FILE)),
            ("export", [path]) => Command::Export(PathBuf::from(*path)),
            ("clear", []) => Command::Clear,
            ("gallery", []) => Command::Gallery,
            ("help" | "?", []) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            ("", _) => bail!("empty command"),
            (other, _) => bail!("unrecognised command '{}', try 'help'", other),
        };
        Ok(parsed)
    }
}

/// Drives one interactive session until `quit` or end of input, returning
/// the session so callers can inspect what happened.
pub fn run<R: BufRead>(dashboard: &Dashboard, input: R, out: &mut dyn Write) -> Result<Session> {
    let mut session = Session::new();
    let mut controls = Controls::default();

    // Every session starts from freshly trained artifacts:
    let (report, _) = dashboard.refresh()?;
    render_accuracies(out, &report)?;
    render_controls(out, &controls, &report)?;
    writeln!(out, "\n  Adjust inputs and run {} to see a prediction.", "analyze".bold())?;

    let mut lines = input.lines();
    loop {
        write!(out, "\n{} ", "iris>".magenta().bold())?;
        out.flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                writeln!(out, "{} {:#}", "error:".red().bold(), e)?;
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        if let Err(e) = execute(dashboard, &command, &mut controls, &mut session, out) {
            writeln!(out, "{} {:#}", "error:".red().bold(), e)?;
        }
    }

    info!(predictions = session.len(), "Session ended");
    Ok(session)
}

fn execute(
    dashboard: &Dashboard,
    command: &Command,
    controls: &mut Controls,
    session: &mut Session,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Command::Set { feature, value } => {
            controls.set(feature, *value)?;
            writeln!(out, "  {} = {}", feature, value)?;
        }
        Command::Model(kind) => {
            controls.model = *kind;
            writeln!(out, "  model = {}", kind)?;
        }
        Command::Show => {
            let (report, _) = dashboard.refresh()?;
            render_controls(out, controls, &report)?;
        }
        Command::Analyze => {
            let analysis = dashboard.analyze(controls, session)?;
            writeln!(
                out,
                "  {} {:.2}%",
                "Accuracy".white().bold(),
                analysis.accuracy * 100.0
            )?;
            render_analysis(out, &analysis)?;
        }
        Command::History => render_history(out, session)?,
        Command::Export(path) => {
            session.export(path)?;
            writeln!(out, "  Exported {} predictions to {}", session.len(), path.display())?;
        }
        Command::Clear => {
            session.clear();
            writeln!(out, "  History cleared.")?;
        }
        Command::Gallery => render_gallery(out)?,
        Command::Help => writeln!(out, "{}", HELP)?,
        Command::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DashboardConfig;
    use crate::dataset::Species;
    use std::io::Cursor;

    #[test]
    fn commands_parse() {
        assert_eq!(
            "set petal_width 1.8".parse::<Command>().unwrap(),
            Command::Set {
                feature: "petal_width".to_string(),
                value: 1.8
            }
        );
        assert_eq!(
            "model Logistic Regression".parse::<Command>().unwrap(),
            Command::Model(ModelKind::LogisticRegression)
        );
        assert_eq!("ANALYZE".parse::<Command>().unwrap(), Command::Analyze);
        assert_eq!(
            "export".parse::<Command>().unwrap(),
            Command::Export(PathBuf::from("prediction_history.csv"))
        );
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);

        assert!("set petal_width".parse::<Command>().is_err());
        assert!("set petal_width wide".parse::<Command>().is_err());
        assert!("model svm".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }

    #[test]
    fn scripted_session_records_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DashboardConfig::default();
        config.storage.model_dir = dir.path().join("saved_models");
        let dashboard = Dashboard::new(config);

        let export = dir.path().join("history.csv");
        let script = format!(
            "model logistic\nanalyze\nset petal_length 9\nset petal_length 5.5\nset petal_width 2.1\nmodel knn\nanalyze\nhistory\nexport {}\nquit\nanalyze\n",
            export.display()
        );

        let mut out = Vec::new();
        let session = run(&dashboard, Cursor::new(script), &mut out).unwrap();
        let text = String::from_utf8_lossy(&out);

        assert_eq!(session.len(), 2);
        assert_eq!(session.history()[0].prediction, Species::Setosa);
        assert_eq!(session.history()[1].model, ModelKind::Knn);
        assert!(text.contains("petal length (cm) must be between"));

        let csv = std::fs::read_to_string(&export).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.starts_with("Model,Prediction,Confidence (%)\n"));
    }

    #[test]
    fn clear_empties_the_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DashboardConfig::default();
        config.storage.model_dir = dir.path().to_path_buf();
        let dashboard = Dashboard::new(config);

        let mut out = Vec::new();
        let session = run(&dashboard, Cursor::new("analyze\nclear\n"), &mut out).unwrap();
        assert!(session.is_empty());
    }
}
