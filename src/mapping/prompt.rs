use std::io::{BufRead, Write};
use std::sync::Mutex;

use crate::model::identity::Identity;

/// Decisions the user mapper may need from an operator.
pub trait Prompter: Send + Sync {
    fn is_interactive(&self) -> bool;
    /// Confirm an email match. Defaults to yes.
    fn confirm_match(&self, source: &Identity, destination: &Identity) -> bool;
    /// Pick a destination identity by index, or `None` to skip.
    fn choose(&self, source: &Identity, candidates: &[Identity]) -> Option<usize>;
}

/// Accepts every email match and skips everything else.
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn is_interactive(&self) -> bool {
        false
    }

    fn confirm_match(&self, _source: &Identity, _destination: &Identity) -> bool {
        true
    }

    fn choose(&self, _source: &Identity, _candidates: &[Identity]) -> Option<usize> {
        None
    }
}

/// Line-oriented prompts over any reader/writer pair (stdin/stdout in the CLI).
pub struct LinePrompter<R, W> {
    io: Mutex<(R, W)>,
}

impl<R: BufRead + Send, W: Write + Send> LinePrompter<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    fn ask(&self, question: &str) -> Option<String> {
        let mut io = self.io.lock().ok()?;
        let (reader, writer) = &mut *io;
        write!(writer, "{question}").ok()?;
        writer.flush().ok()?;
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn say(&self, text: &str) {
        if let Ok(mut io) = self.io.lock() {
            let _ = writeln!(io.1, "{text}");
        }
    }
}

impl<R: BufRead + Send, W: Write + Send> Prompter for LinePrompter<R, W> {
    fn is_interactive(&self) -> bool {
        true
    }

    fn confirm_match(&self, source: &Identity, destination: &Identity) -> bool {
        let answer = self.ask(&format!(
            "Map {} to {}? [Y/n] ",
            source.label(),
            destination.label()
        ));
        match answer {
            Some(a) => !matches!(a.to_lowercase().as_str(), "n" | "no"),
            None => true,
        }
    }

    fn choose(&self, source: &Identity, candidates: &[Identity]) -> Option<usize> {
        self.say(&format!("No email match for {}.", source.label()));
        for (i, candidate) in candidates.iter().enumerate() {
            self.say(&format!("  {}) {}", i + 1, candidate.label()));
        }
        loop {
            let answer = self.ask("Pick a number, or press enter to skip: ")?;
            if answer.is_empty() || answer.eq_ignore_ascii_case("s") {
                return None;
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=candidates.len()).contains(&n) => return Some(n - 1),
                _ => self.say("Not a valid choice."),
            }
        }
    }
}
