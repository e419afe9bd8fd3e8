use std::fmt;
use std::str::FromStr;

/// The two smart-HTTP services a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// fetch / clone
    UploadPack,
    /// push
    ReceivePack,
}

impl Service {
    /// Wire name as it appears in `?service=` and in the POST path.
    pub fn as_str(self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    /// Subcommand passed to the git binary.
    pub fn subcommand(self) -> &'static str {
        match self {
            Service::UploadPack => "upload-pack",
            Service::ReceivePack => "receive-pack",
        }
    }

    pub fn advertisement_content_type(self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-advertisement",
            Service::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    pub fn result_content_type(self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-result",
            Service::ReceivePack => "application/x-git-receive-pack-result",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unsupported service `{0}`")]
pub struct UnknownService(pub String);

impl FromStr for Service {
    type Err = UnknownService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(Service::UploadPack),
            "git-receive-pack" => Ok(Service::ReceivePack),
            other => Err(UnknownService(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_services_only() {
        assert_eq!("git-upload-pack".parse(), Ok(Service::UploadPack));
        assert_eq!("git-receive-pack".parse(), Ok(Service::ReceivePack));
        assert!("upload-pack".parse::<Service>().is_err());
        assert!("rm".parse::<Service>().is_err());
    }

    #[test]
    fn content_types_follow_service_name() {
        for service in [Service::UploadPack, Service::ReceivePack] {
            assert_eq!(
                service.advertisement_content_type(),
                format!("application/x-{service}-advertisement")
            );
            assert_eq!(
                service.result_content_type(),
                format!("application/x-{service}-result")
            );
        }
    }
}
