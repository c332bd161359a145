use serde::Deserialize;

/// Names of the headers the proxy computes and injects upstream
///
/// Each of these is always overwritten (or removed) by the proxy, so an
/// upstream can trust them regardless of what the client sent.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InjectedHeaders {
    /// Identity key built from the alias fields
    /// Default: "x-lb-uid"
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Application id taken from the `appid` parameter
    /// Default: "x-openapi-appid"
    #[serde(default = "default_appid")]
    pub appid: String,
    /// Command taken from the `cmd` parameter
    /// Default: "x-openapi-cmd"
    #[serde(default = "default_command")]
    pub command: String,
    /// Set to the override destination when an identity is rerouted
    /// Default: "x-lb-override"
    #[serde(default = "default_override")]
    pub override_target: String,
    /// Set on requests whose appid is in the bypass list
    /// Default: "x-lb-bypass"
    #[serde(default = "default_bypass")]
    pub bypass: String,
    /// Set on requests from a trusted source address
    /// Default: "x-lb-trusted-source"
    #[serde(default = "default_trusted_source")]
    pub trusted_source: String,
}

impl InjectedHeaders {
    pub fn names(&self) -> [&str; 6] {
        [
            self.identity.as_str(),
            self.appid.as_str(),
            self.command.as_str(),
            self.override_target.as_str(),
            self.bypass.as_str(),
            self.trusted_source.as_str(),
        ]
    }
}

impl Default for InjectedHeaders {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            appid: default_appid(),
            command: default_command(),
            override_target: default_override(),
            bypass: default_bypass(),
            trusted_source: default_trusted_source(),
        }
    }
}

fn default_identity() -> String {
    "x-lb-uid".to_string()
}

fn default_appid() -> String {
    "x-openapi-appid".to_string()
}

fn default_command() -> String {
    "x-openapi-cmd".to_string()
}

fn default_override() -> String {
    "x-lb-override".to_string()
}

fn default_bypass() -> String {
    "x-lb-bypass".to_string()
}

fn default_trusted_source() -> String {
    "x-lb-trusted-source".to_string()
}
