// ====================================================================================
// src/questions.rs - 题库与分类缓存
// ====================================================================================
use crate::{
    error::AppError,
    models::{CategorySummary, Question},
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

const EMBEDDED_BANK: &str = include_str!("../data/questions.json");

pub trait QuestionProvider: Send + Sync {
    fn categories(&self) -> Vec<CategorySummary>;

    /// 同一 seed 必须返回同样的题目序列
    fn select(&self, category: &str, count: usize, seed: u64) -> Result<Vec<Question>, AppError>;
}

pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let questions: Vec<Question> = serde_json::from_str(raw)?;
        Ok(Self { questions })
    }

    pub fn embedded() -> Result<Self, serde_json::Error> {
        Self::from_json(EMBEDDED_BANK)
    }

    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let bank = Self::from_json(&raw)?;
                tracing::info!("从 {} 加载题库，共 {} 道题", path, bank.questions.len());
                Ok(bank)
            }
            None => Ok(Self::embedded()?),
        }
    }
}

impl QuestionProvider for QuestionBank {
    fn categories(&self) -> Vec<CategorySummary> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for q in &self.questions {
            *counts.entry(q.category.as_str()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(id, question_count)| CategorySummary { id: id.to_string(), question_count })
            .collect()
    }

    fn select(&self, category: &str, count: usize, seed: u64) -> Result<Vec<Question>, AppError> {
        let mut pool: Vec<&Question> = self.questions.iter().filter(|q| q.category == category).collect();
        if pool.len() < count {
            return Err(AppError::validation(format!(
                "Category {} has only {} questions",
                category,
                pool.len()
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        pool.shuffle(&mut rng);
        Ok(pool.into_iter().take(count).cloned().collect())
    }
}

// 由房间码派生的选题种子
pub fn seed_for_room(room_code: &str) -> u64 {
    room_code
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| (acc ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3))
}

// 分类列表缓存，带过期时间
pub struct CategoryCache {
    ttl: Duration,
    entry: RwLock<Option<(Instant, Arc<Vec<CategorySummary>>)>>,
}

impl CategoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: RwLock::new(None) }
    }

    pub async fn get_or_refresh<F>(&self, load: F) -> Arc<Vec<CategorySummary>>
    where
        F: FnOnce() -> Vec<CategorySummary>,
    {
        if let Some((loaded_at, categories)) = self.entry.read().await.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return categories.clone();
            }
        }

        let mut entry = self.entry.write().await;
        // 等待写锁期间可能已被其他任务刷新
        if let Some((loaded_at, categories)) = entry.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return categories.clone();
            }
        }
        let categories = Arc::new(load());
        tracing::debug!("分类缓存已刷新，共 {} 个分类", categories.len());
        *entry = Some((Instant::now(), categories.clone()));
        categories
    }
}

// 题库 + 分类缓存，随应用状态传递
pub struct QuestionCatalog {
    provider: Arc<dyn QuestionProvider>,
    cache: CategoryCache,
}

impl QuestionCatalog {
    pub fn new(provider: Arc<dyn QuestionProvider>, cache_ttl: Duration) -> Self {
        Self { provider, cache: CategoryCache::new(cache_ttl) }
    }

    pub async fn categories(&self) -> Arc<Vec<CategorySummary>> {
        let provider = self.provider.clone();
        self.cache.get_or_refresh(move || provider.categories()).await
    }

    pub async fn ensure_category(&self, category: &str, needed: usize) -> Result<(), AppError> {
        let categories = self.categories().await;
        match categories.iter().find(|c| c.id == category) {
            Some(c) if c.question_count >= needed => Ok(()),
            Some(c) => Err(AppError::validation(format!(
                "Category {} has only {} questions",
                category, c.question_count
            ))),
            None => Err(AppError::validation(format!("Unknown category: {}", category))),
        }
    }

    pub fn provider(&self) -> &dyn QuestionProvider {
        self.provider.as_ref()
    }
}
