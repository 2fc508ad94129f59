//! Rule model for adblock-style filter lists.
//!
//! A filter list is a sequence of textual lines. This crate classifies each
//! line as a comment, an `/etc/hosts` entry, an adblock rule, a preprocessor
//! directive, or a blank line, and can reserialize every parsed line back to
//! its original text. It also carries the pattern matcher used by
//! inclusion/exclusion filtering.

mod adblock;
mod hosts;
mod idn;
mod pattern;
mod rule;

pub use adblock::{AdblockRule, RuleOption};
pub use hosts::EtcHostsRule;
pub use idn::to_ascii_hostname;
pub use pattern::FilterPattern;
pub use rule::{Directive, DirectiveKind, Rule};

/// Hostnames that name the machine itself rather than a blocked service.
///
/// Hosts-to-adblock conversion skips these so that `0.0.0.0 localhost`
/// never becomes a blocking rule.
pub const SERVICE_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
    "ip6-localnet",
    "ip6-mcastprefix",
    "ip6-allnodes",
    "ip6-allrouters",
    "ip6-allhosts",
];
