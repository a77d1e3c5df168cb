//! Code-signature extraction via `codesign`.
//!
//! Two invocations per executable: a verify pass that settles signed/valid,
//! and a detail pass parsed for team, authorities, identifier, notarization,
//! and the App Store distribution marker. Any failure collapses to `None`;
//! callers treat that as "no signature".

use std::time::Duration;

use tracing::debug;

use procscope_core::signature::Signature;

use crate::command::run_command;

const CODESIGN_TIMEOUT: Duration = Duration::from_secs(3);

/// Authority string that marks App Store distribution.
const APP_STORE_AUTHORITY: &str = "Apple Mac OS Application Signing";

/// Extract the code signature of the executable at `path`.
pub async fn signature_of(path: &str) -> Option<Signature> {
    let verify = run_command(
        "codesign",
        &["--verify", "--deep", "--strict", path],
        CODESIGN_TIMEOUT,
    )
    .await;

    let verify = match verify {
        Ok(out) => out,
        Err(e) => {
            debug!(path, error = %e, "codesign verify failed");
            return None;
        }
    };

    let mut sig = if verify.success {
        Signature {
            signed: true,
            valid: true,
            ..Default::default()
        }
    } else if verify.stderr.contains("not signed") {
        return Some(Signature::default());
    } else if verify.stderr.contains("No such file") || verify.stderr.contains("unreadable") {
        return None;
    } else {
        // Signed, but verification rejected it.
        Signature {
            signed: true,
            valid: false,
            ..Default::default()
        }
    };

    // Detail output goes to stderr.
    match run_command("codesign", &["-dvvv", path], CODESIGN_TIMEOUT).await {
        Ok(out) => parse_detail(&out.stderr, &mut sig),
        Err(e) => debug!(path, error = %e, "codesign detail failed"),
    }

    Some(sig)
}

/// Parse `codesign -dvvv` output into an existing signature.
pub fn parse_detail(detail: &str, sig: &mut Signature) {
    let mut authorities = Vec::new();
    let mut notarized = false;

    for line in detail.lines() {
        let line = line.trim();
        if let Some(team) = line.strip_prefix("TeamIdentifier=") {
            if team != "not set" {
                sig.team_identifier = Some(team.to_string());
            }
        } else if let Some(authority) = line.strip_prefix("Authority=") {
            authorities.push(authority.to_string());
        } else if let Some(identifier) = line.strip_prefix("Identifier=") {
            sig.identifier = Some(identifier.to_string());
        } else if line.starts_with("Notarization Ticket") {
            notarized = true;
        }
    }

    if !authorities.is_empty() {
        sig.is_app_store = Some(authorities.iter().any(|a| a == APP_STORE_AUTHORITY));
        sig.notarized = Some(notarized);
        sig.authorities = Some(authorities);
    } else if notarized {
        sig.notarized = Some(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVELOPER_DETAIL: &str = "\
Executable=/Applications/Tool.app/Contents/MacOS/Tool
Identifier=com.acme.tool
Format=app bundle with Mach-O universal (x86_64 arm64)
CodeDirectory v=20500 size=1234 flags=0x10000(runtime) hashes=30+7 location=embedded
Signature size=8980
Authority=Developer ID Application: Acme Corp (ABCDE12345)
Authority=Developer ID Certification Authority
Authority=Apple Root CA
Notarization Ticket=stapled
TeamIdentifier=ABCDE12345
";

    const APP_STORE_DETAIL: &str = "\
Identifier=com.example.store
Authority=Apple Mac OS Application Signing
Authority=Apple Worldwide Developer Relations Certification Authority
Authority=Apple Root CA
TeamIdentifier=FGHIJ67890
";

    #[test]
    fn developer_id_detail_parses() {
        let mut sig = Signature {
            signed: true,
            valid: true,
            ..Default::default()
        };
        parse_detail(DEVELOPER_DETAIL, &mut sig);
        assert_eq!(sig.team_identifier.as_deref(), Some("ABCDE12345"));
        assert_eq!(sig.identifier.as_deref(), Some("com.acme.tool"));
        assert_eq!(sig.notarized, Some(true));
        assert_eq!(sig.is_app_store, Some(false));
        assert_eq!(sig.authorities.as_ref().unwrap().len(), 3);
        assert!(sig.authorities.as_ref().unwrap()[0].starts_with("Developer ID Application"));
    }

    #[test]
    fn app_store_authority_detected() {
        let mut sig = Signature {
            signed: true,
            valid: true,
            ..Default::default()
        };
        parse_detail(APP_STORE_DETAIL, &mut sig);
        assert_eq!(sig.is_app_store, Some(true));
        assert_eq!(sig.notarized, Some(false));
    }

    #[test]
    fn team_not_set_stays_absent() {
        let mut sig = Signature {
            signed: true,
            valid: true,
            ..Default::default()
        };
        parse_detail("Identifier=x\nTeamIdentifier=not set\n", &mut sig);
        assert!(sig.team_identifier.is_none());
    }

    #[test]
    fn empty_detail_changes_nothing() {
        let mut sig = Signature {
            signed: true,
            valid: true,
            ..Default::default()
        };
        parse_detail("", &mut sig);
        assert!(sig.authorities.is_none());
        assert!(sig.notarized.is_none());
    }

    #[tokio::test]
    async fn unreadable_path_yields_none() {
        // On hosts without the macOS toolchain this exercises the spawn-error
        // path; on macOS the missing file exercises the verify-error path.
        // Both collapse to "no signature".
        assert!(signature_of("/nonexistent/binary/path").await.is_none());
    }
}
