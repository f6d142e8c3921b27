//! The `META-INF/INDEX.JD` directive list carried by every archive diff.

use crate::PatchError;

pub const INDEX_ENTRY: &str = "META-INF/INDEX.JD";
const HEADER: &str = "version 1.0";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffIndex {
    pub removes: Vec<String>,
    /// `(source in old archive, name in new archive)`.
    pub moves: Vec<(String, String)>,
}

impl DiffIndex {
    pub fn is_empty(&self) -> bool {
        self.removes.is_empty() && self.moves.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for name in &self.removes {
            out.push_str("remove ");
            out.push_str(&escape(name));
            out.push('\n');
        }
        for (from, to) in &self.moves {
            out.push_str("move ");
            out.push_str(&escape(from));
            out.push(' ');
            out.push_str(&escape(to));
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, PatchError> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        match lines.next() {
            Some(HEADER) => {}
            Some(other) => {
                return Err(PatchError::BadIndex(format!("unexpected header '{other}'")));
            }
            None => return Err(PatchError::BadIndex("empty index".to_owned())),
        }

        let mut index = Self::default();
        for line in lines {
            let tokens = split_escaped(line)?;
            match tokens.as_slice() {
                [cmd, name] if cmd == "remove" => index.removes.push(name.clone()),
                [cmd, from, to] if cmd == "move" => {
                    index.moves.push((from.clone(), to.clone()));
                }
                _ => return Err(PatchError::BadIndex(format!("bad directive '{line}'"))),
            }
        }
        Ok(index)
    }
}

fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == ' ' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn split_escaped(line: &str) -> Result<Vec<String>, PatchError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => current.push(next),
                None => {
                    return Err(PatchError::BadIndex(format!("dangling escape in '{line}'")));
                }
            },
            ' ' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}
