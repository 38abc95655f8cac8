// prompt-toggle/src/prompt.rs

//! Instruction template with `{item_name}` and `{sensitivity}` slots.
//!
//! `{{` and `}}` stand for literal braces. Anything else inside braces is an
//! error, and so is a template that omits either slot, so a template that
//! parses always renders completely.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
    #[error("unmatched '}}' at byte {0}")]
    StrayBrace(usize),
    #[error("template is missing the {{{0}}} placeholder")]
    MissingSlot(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot { ItemName, Sensitivity }

impl Slot {
    fn name(self) -> &'static str {
        match self { Self::ItemName => "item_name", Self::Sensitivity => "sensitivity" }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment { Text(String), Slot(Slot) }

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => { chars.next(); text.push('{'); }
                '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => { chars.next(); text.push('}'); }
                '}' => return Err(TemplateError::StrayBrace(i)),
                '{' => {
                    let rest = &source[i + 1..];
                    let end = rest.find('}').ok_or(TemplateError::Unterminated(i))?;
                    let slot = match &rest[..end] {
                        "item_name" => Slot::ItemName,
                        "sensitivity" => Slot::Sensitivity,
                        other => return Err(TemplateError::UnknownPlaceholder(other.to_string())),
                    };
                    if !text.is_empty() { segments.push(Segment::Text(std::mem::take(&mut text))); }
                    segments.push(Segment::Slot(slot));
                    // skip the name and the closing brace
                    while chars.next_if(|&(j, _)| j <= i + 1 + end).is_some() {}
                }
                _ => text.push(c),
            }
        }
        if !text.is_empty() { segments.push(Segment::Text(text)); }

        for slot in [Slot::ItemName, Slot::Sensitivity] {
            if !segments.contains(&Segment::Slot(slot)) { return Err(TemplateError::MissingSlot(slot.name())); }
        }
        Ok(Self { segments })
    }

    pub fn render(&self, item_name: &str, sensitivity: u32) -> String {
        let level = sensitivity.to_string();
        self.segments.iter().fold(String::new(), |mut out, seg| {
            match seg {
                Segment::Text(t) => out.push_str(t),
                Segment::Slot(Slot::ItemName) => out.push_str(item_name),
                Segment::Slot(Slot::Sensitivity) => out.push_str(&level),
            }
            out
        })
    }
}

/// Put `block` in front of the system prompt, separated by a blank line.
pub fn prepend_system_prompt(system_prompt: &mut Option<String>, block: &str) {
    *system_prompt = match system_prompt.take() {
        Some(existing) if !existing.is_empty() => Some(format!("{block}\n\n{existing}")),
        _ => Some(block.to_string()),
    };
}
