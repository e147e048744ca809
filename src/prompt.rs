//! Builds an analysis prompt from journal entries, for pasting into an
//! LLM chat.

use crate::entry::Entry;

const PREAMBLE: &str = "You are an experienced language-learning coach. Below is my \
lesson journal, one section per session, oldest first. Transcribed audio \
appears under a '--- Transcription Vibe ---' marker inside a session's \
notes.\n\nPlease analyse the journal: recurring difficulties, visible \
progress, and three concrete suggestions for the next sessions.";

/// Render entries into a self-contained prompt. Entries are emitted in
/// chronological order regardless of input order.
pub fn build_analysis_prompt(entries: &[Entry]) -> String {
    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by_key(|entry| entry.sort_key());

    let mut out = String::from(PREAMBLE);
    out.push_str("\n\n");
    if sorted.is_empty() {
        out.push_str("(the journal is empty)");
        return out;
    }
    let blocks: Vec<String> = sorted
        .into_iter()
        .map(|entry| {
            let mut block = format!("## {}", entry.label());
            if let (Some(start), Some(end)) = (&entry.start, &entry.end) {
                block.push_str(&format!(" ({start}-{end})"));
            }
            block.push('\n');
            let body = entry.journal.trim();
            block.push_str(if body.is_empty() { "(no notes)" } else { body });
            block
        })
        .collect();
    out.push_str(&blocks.join("\n\n---\n\n"));
    out
}
