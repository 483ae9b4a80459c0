//! The closed set of git services the bridge will run.

use std::fmt;

/// A smart HTTP service.
///
/// Request content only ever selects a variant by exact match; the command
/// line handed to git is built from the variant, never from request text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// `git-upload-pack` (fetch, clone).
    UploadPack,
    /// `git-receive-pack` (push).
    ReceivePack,
}

impl Service {
    /// Every service, in advertisement order.
    pub const ALL: [Service; 2] = [Service::UploadPack, Service::ReceivePack];

    /// Looks up a service by its wire name (`git-upload-pack`, `git-receive-pack`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|service| service.as_str() == name)
    }

    /// Finds the service whose result content type appears in an `Accept` value.
    pub fn from_accept(accept: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|service| accept.contains(service.result_content_type()))
    }

    /// Wire name of the service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    /// The git sub-command that implements the service.
    pub fn subcommand(&self) -> &'static str {
        match self {
            Service::UploadPack => "upload-pack",
            Service::ReceivePack => "receive-pack",
        }
    }

    /// Content type of the `info/refs` response.
    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-advertisement",
            Service::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Content type of the RPC response, also what clients put in `Accept`.
    pub fn result_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-result",
            Service::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    /// Returns true for the service that writes to the repository.
    pub fn is_push(&self) -> bool {
        matches!(self, Service::ReceivePack)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
