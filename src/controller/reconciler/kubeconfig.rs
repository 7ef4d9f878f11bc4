//! # Kubeconfig
//!
//! Renders the kubectl config handed to an attendee: a single cluster, a
//! single user authenticated by the attendee's service account token, and a
//! context defaulting to the attendee namespace.

use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};

/// Cluster, context and user name used inside generated kubeconfigs
pub const KUBECONFIG_CLUSTER_NAME: &str = "workshop";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    clusters: Vec<NamedCluster>,
    contexts: Vec<NamedContext>,
    current_context: String,
    users: Vec<NamedUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: String,
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Context {
    cluster: String,
    namespace: String,
    user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    token: String,
}

/// Render a kubeconfig for `user` scoped to `namespace`
///
/// # Errors
///
/// Returns the serialization error, which only happens if the YAML emitter fails.
pub fn render_kubeconfig(
    cluster_addr: &str,
    namespace: &str,
    user: &str,
    token: &str,
) -> Result<String, serde_yaml::Error> {
    let config = Kubeconfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: KUBECONFIG_CLUSTER_NAME.to_string(),
            cluster: Cluster {
                server: cluster_addr.to_string(),
                insecure_skip_tls_verify: true,
            },
        }],
        contexts: vec![NamedContext {
            name: KUBECONFIG_CLUSTER_NAME.to_string(),
            context: Context {
                cluster: KUBECONFIG_CLUSTER_NAME.to_string(),
                namespace: namespace.to_string(),
                user: user.to_string(),
            },
        }],
        current_context: KUBECONFIG_CLUSTER_NAME.to_string(),
        users: vec![NamedUser {
            name: user.to_string(),
            user: User {
                token: token.to_string(),
            },
        }],
    };
    serde_yaml::to_string(&config)
}

/// Bearer token populated into a service account token secret
///
/// `None` until the token controller has filled the secret in.
pub fn token_from_secret(secret: &Secret) -> Option<String> {
    let bytes = secret.data.as_ref()?.get("token")?;
    String::from_utf8(bytes.0.clone()).ok().filter(|t| !t.is_empty())
}
