//! Fetch and render policies for query reads.

use std::fmt;

use serde::Deserialize;

/// Whether a query read consults the store, the network, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
	/// Never fetch; render whatever the store has.
	StoreOnly,
	/// Fetch only when the store cannot fulfil the query.
	#[default]
	StoreOrNetwork,
	/// Render from the store when possible and always fetch.
	StoreAndNetwork,
	/// Always fetch and wait for the response.
	NetworkOnly,
}

impl FetchPolicy {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::StoreOnly => "store-only",
			Self::StoreOrNetwork => "store-or-network",
			Self::StoreAndNetwork => "store-and-network",
			Self::NetworkOnly => "network-only",
		}
	}
}

impl fmt::Display for FetchPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Whether a read may render while parts of the query are still missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderPolicy {
	#[default]
	Partial,
	Full,
}

impl RenderPolicy {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Partial => "partial",
			Self::Full => "full",
		}
	}
}

impl fmt::Display for RenderPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
