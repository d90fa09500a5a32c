//! The `browse` subcommand: the headless navigation front-end.
//!
//! Runs a single command when one is given on the command line, otherwise
//! an interactive REPL over the browser core.

use anyhow::Result;
use clap::Parser;
use clap_repl::{ClapEditor, ReadCommandOutput};
use serde_json::Value;

use crate::browser::client::{Endpoint, TcpTransport};
use crate::browser::view::{Settings, ViewMode};
use crate::browser::{ActionSink, Browser};
use crate::model::{OpenAction, ProviderObject, stringify};

/// REPL commands over the navigation core.
#[derive(Debug, Parser)]
#[command(name = "")]
pub enum BrowseCommand {
    /// List the objects at the current location
    Ls {
        /// One row per object with class and child count
        #[arg(short, long)]
        long: bool,
    },
    /// Enter an object by number or title
    Open { target: String },
    /// Show all properties of an object by number or title
    Info { target: String },
    /// Go up one level
    Up,
    /// Jump back to the session root
    Root,
    /// Navigate to a deep link
    Goto { path: String },
    /// Print the deep link for the current location
    Path,
    /// Search from the current location
    Search {
        term: String,
        /// Restrict the search to the upper tree levels
        #[arg(long)]
        shallow: bool,
    },
    /// Toggle icon/table view mode
    Mode,
    /// Set the zoom level (clamped to 0.5..=3.0)
    Zoom { level: f64 },
    /// Exit the REPL
    #[command(alias = "quit")]
    Exit,
}

/// Sink that surfaces open actions on stdout; actually spawning terminals
/// and system browsers stays with the desktop shell.
struct PrintSink;

impl ActionSink for PrintSink {
    fn terminal(&mut self, command: &str) {
        println!("[terminal] {command}");
    }
    fn open_url(&mut self, url: &str) {
        println!("[browser] {url}");
    }
    fn other(&mut self, action: &OpenAction) {
        println!("[action] {}", action.action);
    }
}

pub fn run(host: String, port: u16, deep_link: Option<String>, command: Vec<String>) -> Result<()> {
    let settings_path = Settings::default_path();
    let settings = settings_path
        .as_deref()
        .map(Settings::load)
        .unwrap_or_default();

    let mut browser = Browser::new(
        Box::new(TcpTransport::new()),
        Box::new(PrintSink),
        Endpoint::new(host, port),
    );
    browser.view.set_zoom(settings.zoom_level);
    browser.view.details_visible = settings.details_visible;

    if let Some(link) = deep_link {
        browser.navigate_to_path(&link);
    }

    // Single command mode: parse and execute, then exit.
    if !command.is_empty() {
        let mut args = vec![String::new()];
        args.extend(command);
        match BrowseCommand::try_parse_from(&args) {
            Ok(cmd) => {
                if !matches!(cmd, BrowseCommand::Exit) {
                    execute(&mut browser, cmd);
                }
            }
            Err(err) => {
                err.print().ok();
            }
        }
        save_settings(&browser, settings_path.as_deref(), settings);
        return Ok(());
    }

    println!("hibrowse — type 'help' for commands, 'exit' to quit");
    print_listing(&browser, false);

    let mut editor = ClapEditor::<BrowseCommand>::builder().build();
    loop {
        match editor.read_command() {
            ReadCommandOutput::Command(cmd) => {
                if matches!(cmd, BrowseCommand::Exit) {
                    break;
                }
                execute(&mut browser, cmd);
            }
            ReadCommandOutput::EmptyLine | ReadCommandOutput::CtrlC => continue,
            ReadCommandOutput::CtrlD => break,
            ReadCommandOutput::ClapError(err) => {
                err.print().ok();
            }
            ReadCommandOutput::ShlexError => {
                eprintln!("Error: invalid input (check quotes)");
            }
            ReadCommandOutput::ReedlineError(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    save_settings(&browser, settings_path.as_deref(), settings);
    Ok(())
}

fn save_settings(browser: &Browser, path: Option<&std::path::Path>, mut settings: Settings) {
    let Some(path) = path else { return };
    settings.zoom_level = browser.view.zoom;
    settings.details_visible = browser.view.details_visible;
    if let Err(err) = settings.save(path) {
        tracing::warn!("settings not saved: {err:#}");
    }
}

fn execute(browser: &mut Browser, command: BrowseCommand) {
    match command {
        BrowseCommand::Ls { long } => print_listing(browser, long),
        BrowseCommand::Open { target } => {
            match find_target(browser.objects(), &target) {
                Some(index) => {
                    browser.activate(index);
                    print_crumbs(browser);
                    print_listing(browser, false);
                }
                None => println!("no object matches '{target}'"),
            }
        }
        BrowseCommand::Info { target } => match find_target(browser.objects(), &target) {
            Some(index) => {
                browser.select(index);
                if let Some(details) = browser.details() {
                    print_details(details);
                }
            }
            None => println!("no object matches '{target}'"),
        },
        BrowseCommand::Up => {
            let depth = browser.nav().len();
            browser.breadcrumb_click(depth.saturating_sub(1));
            print_crumbs(browser);
            print_listing(browser, false);
        }
        BrowseCommand::Root => {
            browser.breadcrumb_click(0);
            print_crumbs(browser);
            print_listing(browser, false);
        }
        BrowseCommand::Goto { path } => {
            browser.navigate_to_path(&path);
            print_crumbs(browser);
            print_listing(browser, false);
        }
        BrowseCommand::Path => println!("{}", browser.shortcut_path()),
        BrowseCommand::Search { term, shallow } => {
            let outcome = browser.search(&term, !shallow);
            if !outcome.done {
                println!("search did not finish (gave up after {} polls)", outcome.polls);
            }
            for (index, object) in outcome.results.iter().enumerate() {
                println!("{:>3}  {}", index, object.title);
            }
            println!("{} result(s)", outcome.results.len());
        }
        BrowseCommand::Mode => {
            browser.view.toggle_mode();
            print_listing(browser, false);
        }
        BrowseCommand::Zoom { level } => {
            browser.view.set_zoom(level);
            println!("zoom {:.2}", browser.view.zoom);
        }
        BrowseCommand::Exit => unreachable!(),
    }
}

/// Accept a listing index or an exact title.
fn find_target(objects: &[ProviderObject], target: &str) -> Option<usize> {
    if let Ok(index) = target.parse::<usize>() {
        return (index < objects.len()).then_some(index);
    }
    objects.iter().position(|o| o.title == target)
}

fn print_crumbs(browser: &Browser) {
    println!("{}", browser.breadcrumbs().join(" › "));
}

fn print_listing(browser: &Browser, long: bool) {
    let table = long || browser.view.mode == ViewMode::Table;
    for (index, object) in browser.objects().iter().enumerate() {
        if table {
            println!(
                "{:>3}  {:<22} {:<30} {:>6}",
                index,
                object.class.as_str(),
                object.title,
                object.objects
            );
        } else {
            let marker = if object.objects > 0 { "/" } else { "" };
            println!("{:>3}  {}{}", index, object.title, marker);
        }
    }
    if browser.objects().is_empty() {
        println!("(empty)");
    }
}

fn print_details(details: &Value) {
    let Value::Object(map) = details else {
        return;
    };
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        let value = stringify(&map[key]).unwrap_or_else(|| "null".to_string());
        println!("{key:<20} {value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectClass;

    #[test]
    fn test_browse_command_parse() {
        let cmd = BrowseCommand::try_parse_from(["", "ls", "-l"]).unwrap();
        assert!(matches!(cmd, BrowseCommand::Ls { long: true }));

        let cmd = BrowseCommand::try_parse_from(["", "open", "hopper"]).unwrap();
        if let BrowseCommand::Open { target } = cmd {
            assert_eq!(target, "hopper");
        } else {
            panic!("expected Open");
        }

        let cmd = BrowseCommand::try_parse_from(["", "search", "python", "--shallow"]).unwrap();
        if let BrowseCommand::Search { term, shallow } = cmd {
            assert_eq!(term, "python");
            assert!(shallow);
        } else {
            panic!("expected Search");
        }

        let cmd = BrowseCommand::try_parse_from(["", "goto", "/[h1:8888]/x"]).unwrap();
        assert!(matches!(cmd, BrowseCommand::Goto { .. }));

        assert!(matches!(
            BrowseCommand::try_parse_from(["", "quit"]).unwrap(),
            BrowseCommand::Exit
        ));
    }

    #[test]
    fn test_find_target_by_index_and_title() {
        let objects = vec![
            ProviderObject::new(ObjectClass::Directory, "/a", "alpha"),
            ProviderObject::new(ObjectClass::Directory, "/b", "beta"),
        ];
        assert_eq!(find_target(&objects, "1"), Some(1));
        assert_eq!(find_target(&objects, "alpha"), Some(0));
        assert_eq!(find_target(&objects, "7"), None);
        assert_eq!(find_target(&objects, "gamma"), None);
    }
}
