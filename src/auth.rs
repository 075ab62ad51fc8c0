use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal, Write};
use zeroize::Zeroizing;

/// Pre-set encryption password.
pub const PASSWORD_ENV: &str = "NESTSH_PASSWORD";
/// Pre-set new encryption password for `passwd`.
pub const NEW_PASSWORD_ENV: &str = "NESTSH_NEW_PASSWORD";

fn from_env(var: &str) -> Option<Zeroizing<String>> {
    std::env::var(var)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

pub fn read_password() -> Result<Zeroizing<String>> {
    //  NESTSH_PASSWORD="supersecret" nestsh add web deploy@10.0.0.5
    if let Some(pw) = from_env(PASSWORD_ENV) {
        return Ok(pw);
    }

    let pw = read_secret("Encryption password: ")?;
    if pw.is_empty() {
        bail!("no password provided");
    }
    Ok(pw)
}

/// Reads a new password twice. `env_var` short-circuits both prompts.
pub fn read_new_password_with_confirmation(env_var: &str) -> Result<Zeroizing<String>> {
    if let Some(pw) = from_env(env_var) {
        return Ok(pw);
    }

    let pw1 = read_secret("New encryption password: ")?;
    let pw2 = read_secret("Confirm password: ")?;

    if pw1.is_empty() {
        bail!("password cannot be empty");
    }

    if pw1 != pw2 {
        bail!("passwords do not match");
    }

    Ok(pw1)
}

/// One hidden line from the terminal, or one plain line from piped stdin.
pub fn read_secret(prompt: &str) -> Result<Zeroizing<String>> {
    if io::stdin().is_terminal() {
        return Ok(Zeroizing::new(rpassword::prompt_password(prompt)?));
    }
    read_line()
}

/// Asks a yes/no question; anything but `y`/`yes` is a no.
pub fn confirm(prompt: &str) -> Result<bool> {
    if io::stdin().is_terminal() {
        eprint!("{prompt} [y/N] ");
        io::stderr().flush()?;
    }
    let answer = read_line()?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn read_line() -> Result<Zeroizing<String>> {
    let mut buf = Zeroizing::new(String::new());
    io::stdin().lock().read_line(&mut buf)?;
    trim_newline(&mut buf);
    Ok(buf)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_crlf() {
        let mut s = String::from("secret\r\n");
        trim_newline(&mut s);
        assert_eq!(s, "secret");
    }
}
