use std::io;

use console::Term;

use super::styling::bright;

/// Asks a yes/no question on stderr. Anything but `y`/`yes` is a no.
pub fn confirm(question: &str) -> io::Result<bool> {
    let term = Term::stderr();
    term.write_str(&format!("{} [y/N] ", bright(question)))?;
    let answer = term.read_line()?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
