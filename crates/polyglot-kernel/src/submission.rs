//! Splitting submitted code into directive lines and language code.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A `#!name ...` line. `name` includes the `#!` prefix.
    Directive { name: String, line: String },
    Code(String),
}

/// Splits a submission into directive lines and the runs of code between
/// them. Whitespace-only code runs are dropped.
pub fn split(code: &str) -> Vec<Chunk> {
    split_with(code, |_| false)
}

/// Like [`split`], but a line starting with `#name` is also a directive when
/// `known` accepts `name`, so registered directives such as `#r` are
/// recognized while ordinary `#` comments stay code.
pub fn split_with(code: &str, known: impl Fn(&str) -> bool) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for line in code.lines() {
        let trimmed = line.trim_start();
        if let Some(name) = directive_name(trimmed, &known) {
            flush(&mut pending, &mut chunks);
            chunks.push(Chunk::Directive {
                name: name.to_string(),
                line: trimmed.trim_end().to_string(),
            });
        } else {
            pending.push(line);
        }
    }
    flush(&mut pending, &mut chunks);
    chunks
}

fn directive_name<'a>(line: &'a str, known: &impl Fn(&str) -> bool) -> Option<&'a str> {
    if !line.starts_with('#') {
        return None;
    }
    let name = line.split_whitespace().next()?;
    if name.starts_with("#!") {
        (name.len() > 2).then_some(name)
    } else {
        (name.len() > 1 && known(name)).then_some(name)
    }
}

/// The language code of a submission with all directive lines removed.
pub fn code_only(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .filter_map(|c| match c {
            Chunk::Code(code) => Some(code.as_str()),
            Chunk::Directive { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn flush(pending: &mut Vec<&str>, chunks: &mut Vec<Chunk>) {
    if pending.iter().any(|l| !l.trim().is_empty()) {
        chunks.push(Chunk::Code(pending.join("\n")));
    }
    pending.clear();
}

/// Splits a directive line into words, honoring single and double quotes.
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_word = true;
            }
            None if ch.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(ch);
                in_word = true;
            }
        }
    }
    if let Some(q) = quote {
        return Err(format!("unterminated {q} quote"));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
