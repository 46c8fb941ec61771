// src/i18n.rs
//! Localized phrases for the command surface and rendered digests.
//! Russian is the default bot language; English is opt-in per recipient.

use crate::types::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrase {
    Welcome,
    Commands,
    FetchingNews,
    NewsFailed,
    Subscribed,
    AlreadySubscribed,
    Unsubscribed,
    NotSubscribed,
    LanguageUsage,
    LanguageChanged,
    TopicsUsage,
    TopicsUpdated,
    UnknownTopic,
    AdminOnly,
    ManualFanoutFailed,
    NoReportYet,
    DigestHeader,
    DigestFooter,
    StatusHeader,
    ReportHeader,
}

pub fn phrase(lang: Language, p: Phrase) -> &'static str {
    match lang {
        Language::En => english(p),
        Language::Ru => russian(p),
    }
}

fn english(p: Phrase) -> &'static str {
    match p {
        Phrase::Welcome => {
            "Welcome! I deliver AI-researched market digests.\n\
             Daily updates arrive on weekday mornings; use /news any time."
        }
        Phrase::Commands => {
            "Commands:\n\
             /news - fresh market digest\n\
             /subscribe - enable scheduled updates\n\
             /unsubscribe - disable scheduled updates\n\
             /topics - choose topics of interest\n\
             /language - choose language\n\
             /status - your settings and bot stats\n\
             /help - this message"
        }
        Phrase::FetchingNews => "Researching the latest market news...",
        Phrase::NewsFailed => "Unable to fetch news right now. Please try again later.",
        Phrase::Subscribed => "You are now subscribed to scheduled market updates.",
        Phrase::AlreadySubscribed => "You are already subscribed.",
        Phrase::Unsubscribed => "You have been unsubscribed from scheduled updates.",
        Phrase::NotSubscribed => "You are not currently subscribed.",
        Phrase::LanguageUsage => "Usage: /language en | ru",
        Phrase::LanguageChanged => "Language updated.",
        Phrase::TopicsUsage => {
            "Usage: /topics <key>[,<key>...]\nAvailable: all, oil_gas, metals_mining, technology, finance"
        }
        Phrase::TopicsUpdated => "Topic preferences updated.",
        Phrase::UnknownTopic => "Unknown topic key.",
        Phrase::AdminOnly => "Only administrators can run this command.",
        Phrase::ManualFanoutFailed => "Manual notification failed.",
        Phrase::NoReportYet => "No delivery cycle has run yet.",
        Phrase::DigestHeader => "Market digest",
        Phrase::DigestFooter => "Use /news for a fresh digest at any time.",
        Phrase::StatusHeader => "Bot status",
        Phrase::ReportHeader => "Delivery results",
    }
}

fn russian(p: Phrase) -> &'static str {
    match p {
        Phrase::Welcome => {
            "Добро пожаловать! Я присылаю рыночные дайджесты на основе ИИ-исследований.\n\
             Ежедневные обновления приходят утром в будни; /news доступна всегда."
        }
        Phrase::Commands => {
            "Команды:\n\
             /news - свежий рыночный дайджест\n\
             /subscribe - включить регулярные обновления\n\
             /unsubscribe - отключить регулярные обновления\n\
             /topics - выбрать интересующие темы\n\
             /language - выбрать язык\n\
             /status - ваши настройки и статистика бота\n\
             /help - это сообщение"
        }
        Phrase::FetchingNews => "Исследую последние новости рынка...",
        Phrase::NewsFailed => "Не удалось получить новости. Попробуйте позже.",
        Phrase::Subscribed => "Вы подписаны на регулярные рыночные обновления.",
        Phrase::AlreadySubscribed => "Вы уже подписаны.",
        Phrase::Unsubscribed => "Вы отписались от регулярных обновлений.",
        Phrase::NotSubscribed => "Вы сейчас не подписаны.",
        Phrase::LanguageUsage => "Использование: /language en | ru",
        Phrase::LanguageChanged => "Язык обновлён.",
        Phrase::TopicsUsage => {
            "Использование: /topics <ключ>[,<ключ>...]\nДоступно: all, oil_gas, metals_mining, technology, finance"
        }
        Phrase::TopicsUpdated => "Предпочтения по темам обновлены.",
        Phrase::UnknownTopic => "Неизвестный ключ темы.",
        Phrase::AdminOnly => "Эта команда доступна только администраторам.",
        Phrase::ManualFanoutFailed => "Ручная рассылка не удалась.",
        Phrase::NoReportYet => "Цикл рассылки ещё не выполнялся.",
        Phrase::DigestHeader => "Рыночный дайджест",
        Phrase::DigestFooter => "Команда /news пришлёт свежий дайджест в любой момент.",
        Phrase::StatusHeader => "Статус бота",
        Phrase::ReportHeader => "Результаты рассылки",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_phrase_exists_in_both_languages() {
        let all = [
            Phrase::Welcome,
            Phrase::Commands,
            Phrase::FetchingNews,
            Phrase::NewsFailed,
            Phrase::Subscribed,
            Phrase::AlreadySubscribed,
            Phrase::Unsubscribed,
            Phrase::NotSubscribed,
            Phrase::LanguageUsage,
            Phrase::LanguageChanged,
            Phrase::TopicsUsage,
            Phrase::TopicsUpdated,
            Phrase::UnknownTopic,
            Phrase::AdminOnly,
            Phrase::ManualFanoutFailed,
            Phrase::NoReportYet,
            Phrase::DigestHeader,
            Phrase::DigestFooter,
            Phrase::StatusHeader,
            Phrase::ReportHeader,
        ];
        for p in all {
            assert!(!phrase(Language::En, p).is_empty());
            assert!(!phrase(Language::Ru, p).is_empty());
        }
    }
}
