//! Detection of process names imitating well-known system processes.
//!
//! A candidate counts as mimicry when it is *not* the system name itself but
//! becomes equal after homoglyph normalization, after separator stripping,
//! or sits within Levenshtein distance 2 (for names of length ≥ 5).

/// System processes that malware likes to impersonate.
const SYSTEM_PROCESSES: &[&str] = &[
    "kernel_task",
    "launchd",
    "WindowServer",
    "mds",
    "mds_stores",
    "mdworker",
    "cfprefsd",
    "distnoted",
    "coreaudiod",
    "trustd",
    "securityd",
    "opendirectoryd",
    "loginwindow",
    "syslogd",
    "notifyd",
    "configd",
    "fseventsd",
    "Finder",
    "Dock",
];

/// Homoglyph table: visually-confusable characters and their canonical form.
/// Covers digit/letter swaps and the Cyrillic/Greek lookalikes seen in the
/// wild.
const HOMOGLYPHS: &[(char, char)] = &[
    ('0', 'o'),
    ('1', 'l'),
    ('3', 'e'),
    ('5', 's'),
    ('7', 't'),
    ('@', 'a'),
    ('$', 's'),
    ('а', 'a'), // U+0430 cyrillic
    ('е', 'e'), // U+0435
    ('о', 'o'), // U+043E
    ('р', 'p'), // U+0440
    ('с', 'c'), // U+0441
    ('х', 'x'), // U+0445
    ('у', 'y'), // U+0443
    ('і', 'i'), // U+0456
    ('ο', 'o'), // U+03BF greek
    ('α', 'a'), // U+03B1
];

/// Lowercase and fold homoglyphs to their canonical characters.
pub fn normalize_homoglyphs(name: &str) -> String {
    name.chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| {
            HOMOGLYPHS
                .iter()
                .find(|(from, _)| *from == c)
                .map_or(c, |(_, to)| *to)
        })
        .collect()
}

fn strip_separators(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | '.' | ' '))
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Classic two-row Levenshtein over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Return the system process this name imitates, if any.
pub fn find_mimicked_system_process(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        return None;
    }
    for sys in SYSTEM_PROCESSES {
        if name == *sys {
            // The genuine article.
            continue;
        }
        if normalize_homoglyphs(name) == normalize_homoglyphs(sys) {
            return Some(sys);
        }
        if strip_separators(name) == strip_separators(sys) {
            return Some(sys);
        }
        if name.chars().count() >= 5
            && levenshtein(&name.to_lowercase(), &sys.to_lowercase()) <= 2
        {
            return Some(sys);
        }
    }
    None
}
