use std::io::{self, BufRead, IsTerminal, Write};

use vcdmig_migrate::prompt::parse_choice;
use vcdmig_migrate::{MigrateError, Prompter};

/// Asks on stderr, reads answers from stdin.
pub struct StdinPrompter;

impl StdinPrompter {
    fn read_line(&self, prompt: &str) -> Result<String, MigrateError> {
        let mut stderr = io::stderr().lock();
        write!(stderr, "{}: ", prompt).map_err(|e| MigrateError::Prompt(e.to_string()))?;
        stderr.flush().map_err(|e| MigrateError::Prompt(e.to_string()))?;

        let mut line = String::new();
        let n = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| MigrateError::Prompt(e.to_string()))?;
        if n == 0 {
            return Err(MigrateError::Prompt(format!("no answer for '{}': stdin is closed", prompt)));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

fn password_error(prompt: &str, e: io::Error) -> MigrateError {
    MigrateError::Prompt(format!("cannot read password for '{}': {}", prompt, e))
}

fn read_secret(reader: &mut impl BufRead, writer: &mut impl Write, prompt: &str) -> Result<String, MigrateError> {
    let secret = rpassword::prompt_password_from_bufread(reader, writer, format!("{}: ", prompt))
        .map_err(|e| password_error(prompt, e))?;
    if secret.is_empty() {
        return Err(MigrateError::Prompt(format!("no password given for '{}'", prompt)));
    }
    Ok(secret)
}

impl Prompter for StdinPrompter {
    fn confirm(&self, question: &str) -> Result<bool, MigrateError> {
        let answer = self.read_line(&format!("{} [y/N]", question))?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    /// Reads from the controlling terminal with echo off; piped input is
    /// read as a plain line.
    fn password(&self, prompt: &str) -> Result<String, MigrateError> {
        if io::stdin().is_terminal() {
            rpassword::prompt_password(format!("{}: ", prompt)).map_err(|e| password_error(prompt, e))
        } else {
            read_secret(&mut io::stdin().lock(), &mut io::stderr().lock(), prompt)
        }
    }

    fn choose(&self, question: &str, options: &[String]) -> Result<usize, MigrateError> {
        eprintln!("{}", question);
        for (i, option) in options.iter().enumerate() {
            eprintln!("  {}) {}", i + 1, option);
        }
        loop {
            let answer = self.read_line("Choice")?;
            match parse_choice(&answer, options) {
                Ok(idx) => return Ok(idx),
                Err(e) => eprintln!("{}", e),
            }
        }
    }

    fn input(&self, prompt: &str) -> Result<String, MigrateError> {
        self.read_line(prompt)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn piped_secret_is_read_without_its_line_ending() {
        let mut input = Cursor::new(&b"s3cret\r\nleftover\n"[..]);
        let mut shown = Vec::new();
        let secret = read_secret(&mut input, &mut shown, "Password for admin@System").unwrap();
        assert_eq!(secret, "s3cret");
        assert_eq!(String::from_utf8(shown).unwrap(), "Password for admin@System: ");
    }

    #[test]
    fn empty_piped_secret_is_an_error() {
        let mut input = Cursor::new(&b""[..]);
        let err = read_secret(&mut input, &mut Vec::new(), "Password").unwrap_err();
        assert!(matches!(err, MigrateError::Prompt(_)));
    }
}
