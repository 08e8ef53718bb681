use std::{future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;

use super::ChannelMessage;

/// Идентификатор зарегистрированного callback'а внутри канала.
pub type CallbackId = u64;

/// Асинхронный получатель сообщений канала.
///
/// Пока у канала есть хотя бы один callback, синхронное чтение запрещено.
#[async_trait]
pub trait ChannelCallback: Send + Sync + 'static {
    /// Вызывается один раз при регистрации.
    fn start(&self) {}

    /// Обработка одного сообщения. Ошибка логируется каналом.
    async fn handle_message(
        &self,
        message: ChannelMessage,
    ) -> anyhow::Result<()>;

    /// Вызывается при отмене callback'а или закрытии канала.
    fn cancel(&self) {}
}

/// Callback из замыкания.
pub struct FnCallback<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Оборачивает асинхронное замыкание в [`ChannelCallback`].
pub fn callback_fn<F, Fut>(f: F) -> Arc<dyn ChannelCallback>
where
    F: Fn(ChannelMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnCallback {
        f,
        _fut: PhantomData,
    })
}

#[async_trait]
impl<F, Fut> ChannelCallback for FnCallback<F, Fut>
where
    F: Fn(ChannelMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle_message(
        &self,
        message: ChannelMessage,
    ) -> anyhow::Result<()> {
        (self.f)(message).await
    }
}
