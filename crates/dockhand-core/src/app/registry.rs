//! ContainerRegistry - モデル → コンテナの正本（single source of truth）
//!
//! # 排他制御
//! - `RwLock<BTreeMap<..>>` ひとつで全エントリを守る
//! - 読み取り（status クエリ）は並行、書き込みは check-then-set を lock 内で完結
//! - lock を握ったままランタイム呼び出しや sink への配送をしない
//!
//! 書き込み経路は Controller（attach/detach）と Reconciler/Watcher（advance）。
//! advance は merge ルールを通るので、どちらが先でも rank は後退しない。
//!
//! 遷移の通知は write lock を握ったまま outbox（Publisher）に積む。
//! 積むだけなのでブロックせず、sink に届く順序は適用順と一致する。

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::publisher::Publisher;
use crate::domain::container::ContainerInfo;
use crate::domain::events::ContainerNotification;
use crate::domain::launch::{ContainerHandle, LaunchParams};
use crate::domain::model::ModelId;
use crate::domain::status::{ContainerStatus, merge};
use crate::ports::Clock;

pub struct ContainerRegistry {
    entries: RwLock<BTreeMap<ModelId, ContainerInfo>>,
    clock: Arc<dyn Clock>,
    publisher: Publisher,
}

impl ContainerRegistry {
    pub fn new(clock: Arc<dyn Clock>, publisher: Publisher) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
            publisher,
        }
    }

    /// Wait until every notification queued so far reached the sink.
    pub async fn flush_notifications(&self) {
        self.publisher.flush().await;
    }

    pub async fn get(&self, model: &ModelId) -> Option<ContainerInfo> {
        self.entries.read().await.get(model).cloned()
    }

    pub async fn contains(&self, model: &ModelId) -> bool {
        self.entries.read().await.contains_key(model)
    }

    /// Replace an entry wholesale. No notification is published.
    pub async fn upsert(&self, model: ModelId, info: ContainerInfo) {
        self.entries.write().await.insert(model, info);
    }

    /// Known models in lexicographic order.
    pub async fn list_known_models(&self) -> Vec<ModelId> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Create `Closed` entries for models not seen yet. Returns how many were added.
    pub async fn ensure_seeded(&self, models: impl IntoIterator<Item = ModelId>) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let mut added = 0;
        for model in models {
            entries.entry(model).or_insert_with(|| {
                added += 1;
                ContainerInfo::closed(now)
            });
        }
        added
    }

    /// 新しいコンテナを登録する
    ///
    /// rank を Closed に戻した新しいライフタイムを作り、`status` まで進める。
    /// 進んだ場合は通知を積み、その内容を返す。
    pub async fn attach(
        &self,
        model: &ModelId,
        handle: ContainerHandle,
        params: Option<LaunchParams>,
        status: ContainerStatus,
    ) -> Option<ContainerNotification> {
        let mut entries = self.entries.write().await;
        let mut info = ContainerInfo::attached(handle, params, self.clock.now());
        let (next, changed) = merge(info.status, status);
        info.status = next;
        let notification = changed.then(|| ContainerNotification {
            name: model.clone(),
            status: next,
            id: info.runtime_id.clone(),
        });

        debug!(model = %model, container_id = ?info.runtime_id, status = %next, "handle attached");
        entries.insert(model.clone(), info);
        if let Some(notification) = &notification {
            self.publisher.publish(notification.clone());
        }
        notification
    }

    /// 観測した状態を merge する（check-then-set）
    ///
    /// エントリが無い、または runtime_id が現在のハンドルと違う（古いコンテナの
    /// イベント）場合は何もしない。rank が上がったときだけ通知を積んで返す。
    pub async fn advance(
        &self,
        model: &ModelId,
        runtime_id: &str,
        observed: ContainerStatus,
    ) -> Option<ContainerNotification> {
        let mut entries = self.entries.write().await;
        let info = entries.get_mut(model)?;
        if info.runtime_id.as_deref() != Some(runtime_id) {
            return None;
        }

        let (next, changed) = merge(info.status, observed);
        if !changed {
            return None;
        }
        let previous = info.status;
        info.status = next;
        info.updated_at = self.clock.now();
        debug!(model = %model, container_id = %runtime_id, from = %previous, to = %next, "status advanced");

        let notification = ContainerNotification {
            name: model.clone(),
            status: next,
            id: Some(runtime_id.to_string()),
        };
        self.publisher.publish(notification.clone());
        Some(notification)
    }

    /// ハンドルを外してエントリを Closed に戻す
    ///
    /// 現在のハンドルが `runtime_id` のものでなければ何もしない。
    pub async fn detach(&self, model: &ModelId, runtime_id: &str) -> Option<ContainerNotification> {
        let mut entries = self.entries.write().await;
        let info = entries.get_mut(model)?;
        if info.handle.as_ref().map(|h| h.id.as_str()) != Some(runtime_id) {
            return None;
        }
        *info = ContainerInfo::closed(self.clock.now());
        debug!(model = %model, container_id = %runtime_id, "handle detached");

        let notification = ContainerNotification {
            name: model.clone(),
            status: ContainerStatus::Closed,
            id: Some(runtime_id.to_string()),
        };
        self.publisher.publish(notification.clone());
        Some(notification)
    }

    /// Resolve the model an event refers to: by container name first, then by runtime id.
    pub async fn resolve(&self, name: Option<&str>, runtime_id: &str) -> Option<ModelId> {
        let entries = self.entries.read().await;
        if let Some(model) = name.and_then(ModelId::from_cache_name)
            && entries.contains_key(&model)
        {
            return Some(model);
        }
        entries
            .iter()
            .find(|(_, info)| info.runtime_id.as_deref() == Some(runtime_id))
            .map(|(model, _)| model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::LiveEvent;
    use crate::impls::RecordingSink;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn registry_with_sink() -> (ContainerRegistry, Arc<RecordingSink>) {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let sink = Arc::new(RecordingSink::new());
        let publisher = Publisher::spawn(sink.clone(), Duration::from_secs(1));
        (
            ContainerRegistry::new(Arc::new(FixedClock::new(at)), publisher),
            sink,
        )
    }

    fn registry() -> ContainerRegistry {
        registry_with_sink().0
    }

    fn statuses(events: Vec<LiveEvent>) -> Vec<ContainerStatus> {
        events
            .into_iter()
            .map(|LiveEvent::ContainerModel(n)| n.status)
            .collect()
    }

    fn model(raw: &str) -> ModelId {
        ModelId::new(raw).unwrap()
    }

    fn handle(id: &str) -> ContainerHandle {
        ContainerHandle {
            id: id.into(),
            name: "models--acme--infer-7b".into(),
        }
    }

    #[tokio::test]
    async fn seeding_is_idempotent_and_sorted() {
        let reg = registry();
        let added = reg
            .ensure_seeded([model("zeta/b"), model("acme/infer-7b"), model("beta/x")])
            .await;
        assert_eq!(added, 3);

        reg.attach(&model("beta/x"), handle("c9"), None, ContainerStatus::Created)
            .await;
        let added = reg.ensure_seeded([model("beta/x"), model("acme/infer-7b")]).await;
        assert_eq!(added, 0);

        // seeding again must not reset an attached entry
        assert_eq!(
            reg.get(&model("beta/x")).await.unwrap().status,
            ContainerStatus::Created
        );
        assert_eq!(
            reg.list_known_models().await,
            vec![model("acme/infer-7b"), model("beta/x"), model("zeta/b")]
        );
    }

    #[tokio::test]
    async fn advance_is_monotonic_and_notifies_once() {
        let reg = registry();
        let m = model("acme/infer-7b");
        reg.attach(&m, handle("c1"), None, ContainerStatus::Created).await;

        assert!(reg.advance(&m, "c1", ContainerStatus::Destroyed).await.is_some());
        assert!(reg.advance(&m, "c1", ContainerStatus::Created).await.is_none());
        assert!(reg.advance(&m, "c1", ContainerStatus::Destroyed).await.is_none());
        assert_eq!(reg.get(&m).await.unwrap().status, ContainerStatus::Destroyed);
    }

    #[tokio::test]
    async fn transitions_are_delivered_in_apply_order() {
        let (reg, sink) = registry_with_sink();
        let m = model("acme/infer-7b");
        reg.attach(&m, handle("c1"), None, ContainerStatus::Created).await;
        reg.advance(&m, "c1", ContainerStatus::Started).await;
        reg.advance(&m, "c1", ContainerStatus::Created).await;
        reg.advance(&m, "c1", ContainerStatus::Destroyed).await;
        reg.detach(&m, "c1").await;
        reg.flush_notifications().await;

        assert_eq!(
            statuses(sink.events().await),
            vec![
                ContainerStatus::Created,
                ContainerStatus::Started,
                ContainerStatus::Destroyed,
                ContainerStatus::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn upsert_replaces_the_entry() {
        let (reg, sink) = registry_with_sink();
        let m = model("acme/infer-7b");
        reg.attach(&m, handle("c1"), Some(LaunchParams::new(8001)), ContainerStatus::Started)
            .await;

        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut replacement = ContainerInfo::attached(handle("c7"), Some(LaunchParams::new(9000)), at);
        replacement.status = ContainerStatus::Died;
        reg.upsert(m.clone(), replacement.clone()).await;

        let info = reg.get(&m).await.unwrap();
        assert_eq!(info, replacement);
        assert_eq!(info.runtime_id.as_deref(), Some("c7"));
        assert_eq!(info.status, ContainerStatus::Died);
        assert!(reg.contains(&m).await);

        // only the attach was announced
        reg.flush_notifications().await;
        assert_eq!(statuses(sink.events().await), vec![ContainerStatus::Started]);
    }

    #[tokio::test]
    async fn advance_ignores_stale_runtime_ids() {
        let reg = registry();
        let m = model("acme/infer-7b");
        reg.attach(&m, handle("new"), None, ContainerStatus::Created).await;

        assert!(reg.advance(&m, "old", ContainerStatus::Destroyed).await.is_none());
        assert_eq!(reg.get(&m).await.unwrap().status, ContainerStatus::Created);
    }

    #[tokio::test]
    async fn advance_on_unknown_model_is_noop() {
        let reg = registry();
        assert!(
            reg.advance(&model("acme/ghost"), "c1", ContainerStatus::Started)
                .await
                .is_none()
        );
        assert!(reg.list_known_models().await.is_empty());
    }

    #[tokio::test]
    async fn attach_starts_a_fresh_lifetime() {
        let reg = registry();
        let m = model("acme/infer-7b");
        reg.attach(&m, handle("c1"), None, ContainerStatus::Created).await;
        reg.advance(&m, "c1", ContainerStatus::Died).await;

        let notification = reg
            .attach(&m, handle("c2"), None, ContainerStatus::Created)
            .await
            .unwrap();
        assert_eq!(notification.status, ContainerStatus::Created);
        assert_eq!(notification.id.as_deref(), Some("c2"));

        let info = reg.get(&m).await.unwrap();
        assert_eq!(info.status, ContainerStatus::Created);
        assert_eq!(info.runtime_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn detach_resets_only_the_matching_handle() {
        let reg = registry();
        let m = model("acme/infer-7b");
        reg.attach(&m, handle("c1"), Some(LaunchParams::new(8001)), ContainerStatus::Started)
            .await;

        assert!(reg.detach(&m, "other").await.is_none());
        let notification = reg.detach(&m, "c1").await.unwrap();
        assert_eq!(notification.status, ContainerStatus::Closed);

        let info = reg.get(&m).await.unwrap();
        assert_eq!(info.status, ContainerStatus::Closed);
        assert!(info.handle.is_none());
        assert!(info.params.is_none());
    }

    #[tokio::test]
    async fn resolve_by_name_then_runtime_id() {
        let reg = registry();
        let m = model("acme/infer-7b");
        reg.attach(&m, handle("c1"), None, ContainerStatus::Created).await;

        assert_eq!(reg.resolve(Some("models--acme--infer-7b"), "zzz").await, Some(m.clone()));
        assert_eq!(reg.resolve(Some("unrelated"), "c1").await, Some(m.clone()));
        assert_eq!(reg.resolve(None, "c1").await, Some(m));
        assert_eq!(reg.resolve(Some("models--acme--other"), "zzz").await, None);
    }

    #[tokio::test]
    async fn concurrent_writers_never_regress() {
        let (reg, sink) = registry_with_sink();
        let reg = Arc::new(reg);
        let m = model("acme/infer-7b");
        reg.attach(&m, handle("c1"), None, ContainerStatus::Created).await;

        let order = [
            ContainerStatus::Destroyed,
            ContainerStatus::Started,
            ContainerStatus::Died,
            ContainerStatus::Created,
        ];
        let mut joins = Vec::new();
        for _ in 0..8 {
            for status in order {
                let reg = Arc::clone(&reg);
                let m = m.clone();
                joins.push(tokio::spawn(async move { reg.advance(&m, "c1", status).await }));
            }
        }
        let mut notified = Vec::new();
        for join in joins {
            if let Some(n) = join.await.unwrap() {
                notified.push(n.status);
            }
        }

        assert_eq!(reg.get(&m).await.unwrap().status, ContainerStatus::Destroyed);
        // each transition is reported at most once
        let mut unique = notified.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), notified.len());
        assert!(notified.contains(&ContainerStatus::Destroyed));

        // the sink sees the same transitions, strictly increasing
        reg.flush_notifications().await;
        let delivered = statuses(sink.events().await);
        assert_eq!(delivered.first(), Some(&ContainerStatus::Created));
        assert!(delivered.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(delivered.last(), Some(&ContainerStatus::Destroyed));
    }
}
