//! Иерархические топики и сопоставление с шаблонами подписок.
//!
//! Уровни разделяются `/`. В шаблоне `+` совпадает с одним уровнем, `#` с
//! любым хвостом и допустим только последним уровнем.

use std::fmt;

use uuid::Uuid;

/// Разделитель уровней топика.
pub const LEVEL_SEPARATOR: &str = "/";
/// Совпадение с одним уровнем.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Совпадение с любым хвостом.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Префикс сгенерированного приватного входного топика.
const GENERATED_TOPIC_PREFIX: &str = "topic";

/// Делит строку на уровни.
///
/// Пустые уровни в начале и в середине сохраняются, пустой хвост
/// отбрасывается. Число разрезов не превышает `длина - 1`, поэтому `"/"`
/// остаётся одним уровнем.
pub fn split_levels(source: &str) -> Vec<&str> {
    let max_parts = source.chars().count();
    let mut parts = Vec::new();
    let mut rest = source;
    let mut part_count = 1;

    while part_count < max_parts {
        match rest.find(LEVEL_SEPARATOR) {
            Some(idx) => {
                parts.push(&rest[..idx]);
                rest = &rest[idx + LEVEL_SEPARATOR.len()..];
                part_count += 1;
            }
            None => break,
        }
    }

    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

/// Проверяет, совпадает ли входящий `topic` с шаблоном подписки `pattern`.
///
/// Алгоритм пошаговый: уровни шаблона проходятся слева направо, `#`
/// завершает проход совпадением, `+` принимает один уровень, литерал
/// обязан совпасть. Если шаблон закончился раньше топика без `#`, совпадения
/// нет. Шаблон длиннее топика совпадает, только если лишние уровни `+`
/// (`a/+` совпадает с `a`).
pub fn matches(
    pattern: &str,
    topic: &str,
) -> bool {
    let pattern_levels = split_levels(pattern);
    let topic_levels = split_levels(topic);

    let mut is_match = false;
    let mut complete = false;
    let mut p = 0;

    while p < pattern_levels.len() && !complete {
        let level = pattern_levels[p];
        if level == MULTI_LEVEL_WILDCARD {
            complete = true;
            is_match = true;
        } else if level == SINGLE_LEVEL_WILDCARD {
            is_match = true;
        } else if p >= topic_levels.len() {
            complete = true;
            is_match = false;
        } else if level == topic_levels[p] {
            is_match = true;
        } else {
            complete = true;
            is_match = false;
        }
        p += 1;
    }

    if p < topic_levels.len() && !complete {
        is_match = false;
    }

    is_match
}

/// Есть ли в топике символы подстановки.
pub fn is_wildcard(topic: &str) -> bool {
    split_levels(topic)
        .iter()
        .any(|l| *l == SINGLE_LEVEL_WILDCARD || *l == MULTI_LEVEL_WILDCARD)
}

/// Генерирует приватный входной топик: `topic` + 32 hex-символа.
pub fn generated_input_topic() -> String {
    format!("{GENERATED_TOPIC_PREFIX}{}", Uuid::new_v4().simple())
}

/// Шаблон топика с позиционными подстановками `{0}`, `{1}`, ...
///
/// Используется для корневых топиков шин соседей: имя узла подставляется
/// на месте `{0}` в момент подключения.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TopicTemplate(String);

impl TopicTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Подставляет аргументы по порядку. Лишние плейсхолдеры остаются как
    /// есть.
    pub fn format(
        &self,
        args: &[&str],
    ) -> String {
        args.iter()
            .enumerate()
            .fold(self.0.clone(), |acc, (i, arg)| {
                acc.replace(&format!("{{{i}}}"), arg)
            })
    }

    /// Есть ли в шаблоне плейсхолдер для имени узла.
    pub fn has_node_placeholder(&self) -> bool {
        self.0.contains("{0}")
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicTemplate {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    /// Тест проверяет разбиение на уровни: хвостовой пустой уровень
    /// отбрасывается, ведущий сохраняется.
    #[test]
    fn test_split_levels() {
        assert_eq!(split_levels("a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(split_levels("a/b/"), vec!["a", "b"]);
        assert_eq!(split_levels("/a"), vec!["", "a"]);
        assert_eq!(split_levels("a//b"), vec!["a", "", "b"]);
        assert_eq!(split_levels("/"), vec!["/"]);
        assert!(split_levels("").is_empty());
    }

    /// Тест проверяет таблицу совпадений шаблонов.
    #[rstest]
    #[case("a/b", "a/b", true)]
    #[case("a/b", "a/c", false)]
    #[case("a/+", "a/b", true)]
    #[case("a/+/c", "a/b/c", true)]
    #[case("a/+/c", "a/b/d", false)]
    #[case("+", "a/b", false)]
    #[case("a/#", "a/b/c/d", true)]
    #[case("#", "anything/at/all", true)]
    #[case("a", "a/b", false)]
    #[case("a/b/c", "a/b", false)]
    #[case("$fabric/n1/$feeds/$bus/+/#", "$fabric/n1/$feeds/$bus/t/x/y", true)]
    #[case("b/#", "a/b", false)]
    fn test_matches_table(
        #[case] pattern: &str,
        #[case] topic: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(
            matches(pattern, topic),
            expected,
            "pattern={pattern} topic={topic}"
        );
    }

    /// Тест фиксирует граничный случай пошагового алгоритма: уровни шаблона
    /// за концом топика, состоящие из `+` или `#`, не мешают совпадению.
    #[test]
    fn test_trailing_wildcards_past_topic_end_match() {
        assert!(matches("a/+", "a"));
        assert!(matches("a/#", "a"));
        assert!(matches("a/+/+", "a"));
        assert!(!matches("a/+/x", "a"));
    }

    /// Тест проверяет, что `#` прекращает проход даже если за ним есть
    /// уровни.
    #[test]
    fn test_hash_terminates_scan() {
        assert!(matches("a/#/zzz", "a/b/c"));
    }

    #[test]
    fn test_is_wildcard() {
        assert!(is_wildcard("a/+/b"));
        assert!(is_wildcard("a/#"));
        assert!(!is_wildcard("a/b+c"));
    }

    /// Тест проверяет формат сгенерированного топика.
    #[test]
    fn test_generated_input_topic() {
        let t = generated_input_topic();
        assert!(t.starts_with("topic"));
        assert_eq!(t.len(), "topic".len() + 32);
        assert_ne!(t, generated_input_topic());
    }

    /// Тест проверяет подстановку имени узла в шаблон.
    #[test]
    fn test_template_format() {
        let tpl = TopicTemplate::new("$fabric/{0}/$commands/$bus");
        assert_eq!(tpl.format(&["node-b"]), "$fabric/node-b/$commands/$bus");
        assert!(tpl.has_node_placeholder());

        let clients = TopicTemplate::new("$fabric/{0}/$clients/{1}/{2}");
        assert_eq!(
            clients.format(&["n1", "actor", "platform"]),
            "$fabric/n1/$clients/actor/platform"
        );
    }
}
