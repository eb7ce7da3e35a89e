//! 权限解析
//!
//! 解析顺序：
//! 1. 工作区所有者对工作区及其下所有页面拥有 admin
//! 2. 资源上的直接授权（级别向下包含）
//! 3. 页面继承所属工作区的授权
//!
//! 两个后端共用这一套规则，只依赖契约中的读操作。

use uuid::Uuid;

use crate::error::Result;
use crate::storage::{
    Entity, ListQuery, Page, PermissionLevel, Record, ResourceType, Store, UserId, Workspace,
};

pub async fn resolve_permission<S: Store + ?Sized>(
    store: &S,
    user_id: UserId,
    resource_type: ResourceType,
    resource_id: Uuid,
    level: PermissionLevel,
) -> Result<bool> {
    if has_direct_grant(store, user_id, resource_type, resource_id, level).await? {
        return Ok(true);
    }

    let workspace_id = match resource_type {
        ResourceType::Workspace => resource_id,
        ResourceType::Page => match store.get(Page::KIND, resource_id).await? {
            Some(Record::Page(page)) => {
                let inherited = has_direct_grant(
                    store,
                    user_id,
                    ResourceType::Workspace,
                    page.workspace_id.0,
                    level,
                )
                .await?;
                if inherited {
                    return Ok(true);
                }
                page.workspace_id.0
            }
            _ => return Ok(false),
        },
    };

    match store.get(Workspace::KIND, workspace_id).await? {
        Some(Record::Workspace(ws)) => Ok(ws.owner_id == user_id),
        _ => Ok(false),
    }
}

async fn has_direct_grant<S: Store + ?Sized>(
    store: &S,
    user_id: UserId,
    resource_type: ResourceType,
    resource_id: Uuid,
    level: PermissionLevel,
) -> Result<bool> {
    let grants = store
        .list(&ListQuery::PermissionsOnResource {
            resource_type,
            resource_id,
        })
        .await?;
    Ok(grants.iter().any(|r| match r {
        Record::Permission(p) => p.user_id == user_id && p.level.satisfies(level),
        _ => false,
    }))
}
