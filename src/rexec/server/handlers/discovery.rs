/*
 * Copyright (C) 2024 The Rexec Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use axum::Json;
use serde::{Deserialize, Serialize};

/// API group under which the audited exec resource is published. Clients
/// address the proxy through this group; the proxy rewrites calls onto the
/// core `pods/exec` resource upstream.
pub const AUDIT_GROUP: &str = "audit.rexec.io";
pub const AUDIT_VERSION: &str = "v1beta1";

pub fn audit_group_version() -> String {
    format!("{}/{}", AUDIT_GROUP, AUDIT_VERSION)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct APIGroupList {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub groups: Vec<APIGroup>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct APIGroup {
    pub name: String,
    pub versions: Vec<GroupVersion>,
    #[serde(rename = "preferredVersion")]
    pub preferred_version: GroupVersion,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupVersion {
    #[serde(rename = "groupVersion")]
    pub group_version: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct APIResourceList {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "groupVersion")]
    pub group_version: String,
    pub resources: Vec<APIResource>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct APIResource {
    pub name: String,
    #[serde(rename = "singularName")]
    pub singular_name: String,
    pub namespaced: bool,
    pub kind: String,
    pub verbs: Vec<String>,
}

fn audit_group() -> APIGroup {
    let version = GroupVersion {
        group_version: audit_group_version(),
        version: AUDIT_VERSION.to_string(),
    };
    APIGroup {
        name: AUDIT_GROUP.to_string(),
        versions: vec![version.clone()],
        preferred_version: version,
    }
}

pub async fn api_groups() -> Json<APIGroupList> {
    Json(APIGroupList {
        api_version: "v1".to_string(),
        kind: "APIGroupList".to_string(),
        groups: vec![audit_group()],
    })
}

pub async fn audit_api_resources() -> Json<APIResourceList> {
    Json(APIResourceList {
        kind: "APIResourceList".to_string(),
        api_version: "v1".to_string(),
        group_version: audit_group_version(),
        resources: vec![APIResource {
            name: "pods/exec".to_string(),
            singular_name: String::new(),
            namespaced: true,
            kind: "PodExecOptions".to_string(),
            verbs: vec!["create".to_string(), "get".to_string()],
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_list_advertises_the_audit_group() {
        let Json(list) = api_groups().await;
        assert_eq!(list.kind, "APIGroupList");
        assert_eq!(list.groups.len(), 1);
        assert_eq!(list.groups[0].name, AUDIT_GROUP);
        assert_eq!(
            list.groups[0].preferred_version.group_version,
            "audit.rexec.io/v1beta1"
        );
    }

    #[tokio::test]
    async fn resource_list_advertises_the_exec_resource() {
        let Json(list) = audit_api_resources().await;
        assert_eq!(list.group_version, "audit.rexec.io/v1beta1");
        assert_eq!(list.resources.len(), 1);
        let resource = &list.resources[0];
        assert_eq!(resource.name, "pods/exec");
        assert!(resource.namespaced);
        assert!(resource.verbs.contains(&"create".to_string()));
    }
}
