//! AI crawler User-Agent catalog.
//!
//! Categories are evaluated in declaration order, and patterns within a
//! category in declaration order. The first matching pattern wins, so a
//! User-Agent that mentions two crawlers resolves to whichever category is
//! declared first.

use regex::{Regex, RegexBuilder};

/// Bumped whenever a category is renamed or a pattern is added or removed.
pub const CATALOG_VERSION: u32 = 1;

struct CategoryDef {
    category: &'static str,
    patterns: &'static [&'static str],
}

const CATALOG: &[CategoryDef] = &[
    CategoryDef {
        category: "ChatGPT",
        patterns: &[r"GPTBot", r"ChatGPT-User", r"OpenAI", r"ChatGPT"],
    },
    CategoryDef {
        category: "DeepSeek",
        patterns: &[r"DeepSeek", r"DeepSeekBot", r"DeepSeek-Crawler"],
    },
    CategoryDef {
        category: "Claude",
        patterns: &[r"Claude-Web", r"Anthropic", r"ClaudeBot", r"Claude"],
    },
    CategoryDef {
        category: "Gemini",
        patterns: &[r"Google-Extended", r"Gemini", r"GoogleAI", r"GeminiBot"],
    },
    CategoryDef {
        category: "Perplexity",
        patterns: &[r"PerplexityBot", r"Perplexity", r"PerplexityAI"],
    },
    CategoryDef {
        category: "Bing AI",
        patterns: &[r"BingBot", r"Microsoft-BingBot", r"BingPreview", r"BingAI"],
    },
    CategoryDef {
        category: "Meta AI",
        patterns: &[r"facebookexternalhit", r"MetaBot", r"MetaAI"],
    },
    CategoryDef {
        category: "Character.AI",
        patterns: &[r"Character\.AI", r"CharacterAI"],
    },
    CategoryDef {
        category: "You.com",
        patterns: &[r"YouBot", r"You\.com"],
    },
    CategoryDef {
        category: "Other AI Bots",
        patterns: &[
            r"AI2Bot",
            r"JasperBot",
            r"Copy\.ai",
            r"NotionBot",
            r"SlackBot",
            r"DiscordBot",
            r"CohereBot",
            r"ReplicateBot",
            r"HuggingFaceBot",
        ],
    },
];

/// One compiled catalog entry.
#[derive(Debug, Clone)]
pub struct BotSignature {
    pub category: &'static str,
    pub pattern: &'static str,
    regex: Regex,
}

/// A User-Agent hit: the owning category and the pattern that matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UaMatch {
    pub category: &'static str,
    pub pattern: &'static str,
}

impl UaMatch {
    /// Display name for the matched crawler, derived from its pattern.
    pub fn bot_name(&self) -> String {
        bot_name_for(self.pattern, self.category)
    }
}

/// Strip regex syntax from a pattern, keeping word characters, `-` and `.`.
pub fn bot_name_for(pattern: &str, category: &str) -> String {
    let clean: String = pattern
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    if clean.is_empty() {
        category.to_string()
    } else {
        clean
    }
}

/// Compiled, immutable User-Agent catalog.
pub struct PatternCatalog {
    signatures: Vec<BotSignature>,
}

impl PatternCatalog {
    pub fn new() -> Result<Self, regex::Error> {
        let mut signatures = Vec::new();
        for def in CATALOG {
            for pattern in def.patterns {
                let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
                signatures.push(BotSignature {
                    category: def.category,
                    pattern: *pattern,
                    regex,
                });
            }
        }
        Ok(Self { signatures })
    }

    /// First matching signature for `ua`, or `None` for empty or unmatched input.
    pub fn match_user_agent(&self, ua: &str) -> Option<UaMatch> {
        if ua.is_empty() {
            return None;
        }
        self.signatures
            .iter()
            .find(|sig| sig.regex.is_match(ua))
            .map(|sig| UaMatch {
                category: sig.category,
                pattern: sig.pattern,
            })
    }

    pub fn signatures(&self) -> &[BotSignature] {
        &self.signatures
    }

    /// Categories in evaluation order.
    pub fn categories(&self) -> Vec<&'static str> {
        CATALOG.iter().map(|def| def.category).collect()
    }
}
