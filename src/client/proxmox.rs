//! Proxmox VE implementation of [`ClusterClient`]
//!
//! Talks to the `api2/json` HTTP API. A client is connected once per
//! balancing cycle: authentication fetches a ticket cookie and CSRF token,
//! and the cluster-wide manager status and resource list are cached on the
//! client for the lifetime of the cycle.
//!
//! Operator intent (node and guest states) travels in a YAML block embedded
//! in the free-text description field, delimited by `<proxbalance>` tags:
//!
//! ```text
//! <proxbalance>
//! node_state: RUNNING
//! </proxbalance>
//! ```

use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::balancer::snapshot::{Guest, GuestKind, GuestState, GuestSummary, Node, NodeState};
use crate::config::ProxmoxConfig;

use super::{ClientError, ClusterClient, MigrationJob, MigrationStatus};

const ANNOTATION_OPEN: &str = "<proxbalance>";
const ANNOTATION_CLOSE: &str = "</proxbalance>";

// ============================================================================
// Wire types
// ============================================================================

/// Every api2/json response wraps its payload in a `data` field.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Debug, Deserialize)]
struct ManagerStatusData {
    quorum: QuorumInfo,
    manager_status: ManagerInfo,
}

#[derive(Debug, Deserialize)]
struct QuorumInfo {
    quorate: String,
}

#[derive(Debug, Deserialize)]
struct ManagerInfo {
    master_node: String,
}

/// One entry of `/cluster/resources`; nodes and guests share the endpoint
/// and are told apart by `type`.
#[derive(Debug, Clone, Deserialize)]
struct ResourceItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    node: Option<String>,
    #[serde(default)]
    vmid: Option<u32>,
    #[serde(default)]
    mem: Option<u64>,
    #[serde(default)]
    maxmem: Option<u64>,
    #[serde(default)]
    maxcpu: Option<u32>,
    #[serde(default)]
    cpu: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DescribedConfig {
    #[serde(default)]
    description: Option<String>,
}

/// The API reports vmid as a number in some listings and a string in others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VmidField {
    Num(u32),
    Str(String),
}

impl VmidField {
    fn value(&self) -> Option<u32> {
        match self {
            VmidField::Num(n) => Some(*n),
            VmidField::Str(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeGuestItem {
    vmid: VmidField,
    status: String,
}

#[derive(Debug, Deserialize)]
struct NodeAnnotation {
    node_state: String,
}

#[derive(Debug, Deserialize)]
struct GuestAnnotation {
    guest_state: String,
}

// ============================================================================
// Annotation parsing (pure)
// ============================================================================

/// Extract the YAML between the annotation tags, if both are present.
fn annotation_block(description: &str) -> Option<&str> {
    let start = description.find(ANNOTATION_OPEN)? + ANNOTATION_OPEN.len();
    let end = start + description[start..].find(ANNOTATION_CLOSE)?;
    Some(&description[start..end])
}

/// What a node's description said about its operator state.
#[derive(Debug, PartialEq)]
enum NodeStateResolution {
    /// No annotation block, or no readable `node_state` in it.
    Undefined,
    /// A `node_state` was given but is not a recognized state.
    Invalid(String),
    Resolved(NodeState),
}

/// Resolve a node's operator state from its description.
fn resolve_node_state(description: Option<&str>) -> NodeStateResolution {
    let annotation = description
        .and_then(annotation_block)
        .and_then(|block| serde_yaml::from_str::<NodeAnnotation>(block).ok());
    let Some(annotation) = annotation else {
        return NodeStateResolution::Undefined;
    };
    match NodeState::parse(&annotation.node_state) {
        Some(state) => NodeStateResolution::Resolved(state),
        None => NodeStateResolution::Invalid(annotation.node_state),
    }
}

/// Resolve a guest's operator state. Anything missing, malformed, or
/// unrecognized resolves to `Managed`.
fn resolve_guest_state(description: Option<&str>) -> GuestState {
    description
        .and_then(annotation_block)
        .and_then(|block| serde_yaml::from_str::<GuestAnnotation>(block).ok())
        .and_then(|a| GuestState::parse(&a.guest_state))
        .unwrap_or(GuestState::Managed)
}

/// Form parameters of a migration request: containers restart on the far
/// side, VMs move live.
fn migration_params(kind: GuestKind) -> [(&'static str, &'static str); 1] {
    match kind {
        GuestKind::Container => [("restart", "1")],
        GuestKind::Vm => [("online", "1")],
    }
}

/// GET an api2/json path with ticket auth and unwrap the `data` envelope.
async fn get_data<T: for<'de> Deserialize<'de>>(
    http: &reqwest::Client,
    base_url: &str,
    ticket: &str,
    path: &str,
) -> Result<T, ClientError> {
    let url = format!("{}{}", base_url, path);
    debug!("running get request on {}", path);
    let response = http
        .get(&url)
        .header(header::COOKIE, format!("PVEAuthCookie={}", ticket))
        .send()
        .await
        .map_err(|e| ClientError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Api {
            status: status.as_u16(),
            reason: response.text().await.unwrap_or_default(),
        });
    }

    let payload: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| ClientError::Parse(format!("{}: {}", path, e)))?;
    Ok(payload.data)
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug)]
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
    /// `PVEAuthCookie` value from authentication.
    ticket: String,
    /// CSRF token required on every write request.
    csrf_token: String,
    manager_status: ManagerStatusData,
    /// Cycle-cached `/cluster/resources` payload.
    resources: Vec<ResourceItem>,
    /// Nodes with their operator state already resolved; ignored nodes are
    /// gone by the time this is populated.
    nodes: Vec<Node>,
}

impl ProxmoxClient {
    /// Authenticate and take the cycle's snapshot of cluster-wide state.
    pub async fn connect(config: &ProxmoxConfig) -> Result<Self, ClientError> {
        debug!("connecting to {}", config.base_url());

        // Proxmox ships self-signed certificates by default.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;

        let password = config.password().ok_or_else(|| ClientError::Auth {
            status: 0,
            reason: "no password configured".to_string(),
        })?;

        let base_url = config.base_url();
        let url = format!("{}/api2/json/access/ticket", base_url);
        debug!("authorization attempt");
        let response = http
            .post(&url)
            .form(&[
                ("username", config.username.as_str()),
                ("password", password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ClientError::Http(format!("ticket request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Auth {
                status: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            });
        }
        debug!("successful authentication, response code {}", status);

        let ticket: ApiResponse<TicketData> = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        let manager_status = get_data(
            &http,
            &base_url,
            &ticket.data.ticket,
            "/api2/json/cluster/ha/status/manager_status",
        )
        .await?;
        let resources = get_data(
            &http,
            &base_url,
            &ticket.data.ticket,
            "/api2/json/cluster/resources",
        )
        .await?;

        let mut client = Self {
            http,
            base_url,
            ticket: ticket.data.ticket,
            csrf_token: ticket.data.csrf_token,
            manager_status,
            resources,
            nodes: Vec::new(),
        };
        client.nodes = client.fetch_nodes().await?;

        Ok(client)
    }

    fn cookie(&self) -> String {
        format!("PVEAuthCookie={}", self.ticket)
    }

    /// GET an api2/json path and unwrap the `data` envelope.
    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ClientError> {
        get_data(&self.http, &self.base_url, &self.ticket, path).await
    }

    /// POST a form to an api2/json path, returning the raw response for the
    /// caller to interpret.
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("running post request on {}", path);
        self.http
            .post(&url)
            .header(header::COOKIE, self.cookie())
            .header("CSRFPreventionToken", &self.csrf_token)
            .form(form)
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))
    }

    /// Resolve the online nodes and their operator states.
    async fn fetch_nodes(&self) -> Result<Vec<Node>, ClientError> {
        let mut nodes = Vec::new();
        for item in &self.resources {
            if item.kind != "node" || item.status.as_deref() != Some("online") {
                continue;
            }
            let name = item
                .node
                .clone()
                .ok_or_else(|| ClientError::Parse("node resource without a name".to_string()))?;

            let config: DescribedConfig =
                self.get(&format!("/api2/json/nodes/{}/config", name)).await?;
            let state = match resolve_node_state(config.description.as_deref()) {
                NodeStateResolution::Undefined => {
                    warn!("no node state defined for node {}, ignoring", name);
                    continue;
                }
                NodeStateResolution::Invalid(raw) => {
                    warn!("invalid node state {} defined for node {}, ignoring", raw, name);
                    continue;
                }
                NodeStateResolution::Resolved(NodeState::Ignore) => {
                    info!("IGNORE node state defined for node {}, ignoring", name);
                    continue;
                }
                NodeStateResolution::Resolved(state) => state,
            };

            nodes.push(Node {
                name,
                maxmem: item.maxmem.unwrap_or(0),
                mem: item.mem.unwrap_or(0),
                maxcpu: item.maxcpu.unwrap_or(0),
                cpu: item.cpu.unwrap_or(0.0),
                state,
                deviation: 0.0,
            });
        }
        Ok(nodes)
    }
}

#[async_trait]
impl ClusterClient for ProxmoxClient {
    async fn is_quorate(&self) -> Result<bool, ClientError> {
        Ok(self.manager_status.quorum.quorate == "1")
    }

    async fn is_manager(&self) -> Result<bool, ClientError> {
        let host = hostname::get()
            .map_err(|e| ClientError::Http(format!("cannot resolve local hostname: {}", e)))?;
        Ok(host.to_string_lossy() == self.manager_status.manager_status.master_node)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClientError> {
        Ok(self.nodes.clone())
    }

    async fn list_guests(&self, include_containers: bool) -> Result<Vec<Guest>, ClientError> {
        let mut guests = Vec::new();
        for item in &self.resources {
            let kind = match item.kind.as_str() {
                "qemu" => GuestKind::Vm,
                "lxc" if include_containers => GuestKind::Container,
                _ => continue,
            };
            if item.status.as_deref() != Some("running") {
                continue;
            }
            let (Some(node), Some(vmid)) = (item.node.clone(), item.vmid) else {
                return Err(ClientError::Parse(format!(
                    "{} resource without node or vmid",
                    item.kind
                )));
            };

            // Guests hosted on ignored or offline nodes are out of scope.
            if !self.nodes.iter().any(|n| n.name == node) {
                continue;
            }

            let config: DescribedConfig = self
                .get(&format!("/api2/json/nodes/{}/{}/{}/config", node, kind, vmid))
                .await?;
            if resolve_guest_state(config.description.as_deref()) == GuestState::Ignored {
                info!("IGNORED guest state defined for {} {}, ignoring", kind, vmid);
                continue;
            }

            guests.push(Guest {
                vmid,
                kind,
                node,
                mem: item.mem.unwrap_or(0),
                maxmem: item.maxmem.unwrap_or(0),
                running: true,
            });
        }
        Ok(guests)
    }

    async fn request_migration(
        &self,
        guest: &Guest,
        destination: &Node,
    ) -> Result<MigrationJob, ClientError> {
        let path = format!(
            "/api2/json/nodes/{}/{}/{}/migrate",
            guest.node, guest.kind, guest.vmid
        );
        let [extra] = migration_params(guest.kind);
        let form = [("target", destination.name.as_str()), extra];

        let response = self.post_form(&path, &form).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            });
        }

        let upid: ApiResponse<String> = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(MigrationJob(upid.data))
    }

    async fn poll_migration(
        &self,
        origin: &str,
        guest: &Guest,
    ) -> Result<MigrationStatus, ClientError> {
        let url = format!(
            "{}/api2/json/nodes/{}/{}/{}/migrate",
            self.base_url, origin, guest.kind, guest.vmid
        );
        let response = self
            .http
            .get(&url)
            .header(header::COOKIE, self.cookie())
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let reason = response.text().await.unwrap_or_default();
            if reason.contains("locked (migrate)") {
                return Ok(MigrationStatus::Locked);
            }
        }
        // No migration lock: the job has finished one way or the other.
        Ok(MigrationStatus::Idle)
    }

    async fn list_guests_on_node(
        &self,
        node: &str,
        kind: GuestKind,
    ) -> Result<Vec<GuestSummary>, ClientError> {
        let items: Vec<NodeGuestItem> = self
            .get(&format!("/api2/json/nodes/{}/{}", node, kind))
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| {
                item.vmid.value().map(|vmid| GuestSummary {
                    vmid,
                    running: item.status == "running",
                })
            })
            .collect())
    }

    async fn resume_guest(&self, node: &str, guest: &Guest) -> Result<(), ClientError> {
        let path = format!(
            "/api2/json/nodes/{}/qemu/{}/status/resume",
            node, guest.vmid
        );
        let response = self.post_form(&path, &[]).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}
