pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("token request for {namespace}/{name} failed: {source}")]
    TokenRequest {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("encoding token request for {namespace}/{name}: {source}")]
    TokenRequestEncode {
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("token response for {0}/{1} carried no status")]
    EmptyTokenResponse(String, String),

    #[error("secret {namespace}/{name} is missing {key:?}")]
    MissingSecretKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("fetching secret {namespace}/{name}: {source}")]
    SecretFetch {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("malformed dockerconfigjson in {namespace}/{name}: {source}")]
    MalformedDockerConfig {
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("building impersonated client: {0}")]
    ClientBuild(#[from] kube::Error),
}
