use crate::defs::Source;

/// What the terminal front end is showing. Every transition produces the next
/// view by value; nothing is mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Dashboard { category: String, selected: usize },
    Detail { category: String, article_key: String, return_index: usize },
    Settings { return_to: String },
    Exited,
}

/// Config edits requested from the settings screen. Persisting them is the
/// config manager's job; the core is told to reload afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEdit {
    AddSource(Source),
    RemoveSource { name: String },
    SetSourceEnabled { name: String, enabled: bool },
    SetRefreshInterval { category: String, secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    SelectCategory(String),
    MoveSelection(isize),
    OpenSelected,
    Back,
    OpenSettings,
    Refresh,
    EditConfig(ConfigEdit),
    ToggleBookmark,
    Quit,
}

/// Side effects the front end must carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Refresh(String),
    LoadRelated(String),
    PersistConfig(ConfigEdit),
    ToggleBookmark(String),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub view: View,
    pub effect: Option<Effect>,
}

impl Transition {
    fn stay(view: View) -> Self {
        Self { view, effect: None }
    }

    fn to(view: View, effect: Effect) -> Self {
        Self { view, effect: Some(effect) }
    }
}

/// Read-only data a transition may consult.
#[derive(Debug, Clone, Copy)]
pub struct ViewContext<'a> {
    pub categories: &'a [String],
    /// Article keys in the order the dashboard lists them.
    pub visible_keys: &'a [String],
}

impl View {
    pub fn dashboard(category: impl Into<String>) -> Self {
        View::Dashboard { category: category.into(), selected: 0 }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            View::Dashboard { category, .. } | View::Detail { category, .. } => Some(category),
            View::Settings { return_to } => Some(return_to),
            View::Exited => None,
        }
    }

    pub fn apply(self, event: UiEvent, ctx: &ViewContext<'_>) -> Transition {
        use UiEvent as E;

        match (self, event) {
            (View::Exited, _) => Transition::stay(View::Exited),

            (View::Dashboard { category, selected }, event) => match event {
                E::SelectCategory(next) if ctx.categories.contains(&next) => {
                    Transition::to(View::dashboard(next.clone()), Effect::Refresh(next))
                }
                E::SelectCategory(_) => Transition::stay(View::Dashboard { category, selected }),
                E::MoveSelection(delta) => {
                    let selected = clamp_selection(selected, delta, ctx.visible_keys.len());
                    Transition::stay(View::Dashboard { category, selected })
                }
                E::OpenSelected => match ctx.visible_keys.get(selected) {
                    Some(key) => Transition::to(
                        View::Detail {
                            category,
                            article_key: key.clone(),
                            return_index: selected,
                        },
                        Effect::LoadRelated(key.clone()),
                    ),
                    None => Transition::stay(View::Dashboard { category, selected }),
                },
                E::Back => Transition::stay(View::Dashboard { category, selected }),
                E::OpenSettings => Transition::stay(View::Settings { return_to: category }),
                E::Refresh => Transition::to(
                    View::Dashboard { category: category.clone(), selected },
                    Effect::Refresh(category),
                ),
                E::EditConfig(_) => Transition::stay(View::Dashboard { category, selected }),
                E::ToggleBookmark => match ctx.visible_keys.get(selected) {
                    Some(key) => Transition::to(
                        View::Dashboard { category, selected },
                        Effect::ToggleBookmark(key.clone()),
                    ),
                    None => Transition::stay(View::Dashboard { category, selected }),
                },
                E::Quit => Transition::to(View::Exited, Effect::Exit),
            },

            (View::Detail { category, article_key, return_index }, event) => match event {
                E::Back => Transition::stay(View::Dashboard { category, selected: return_index }),
                E::ToggleBookmark => Transition::to(
                    View::Detail {
                        category,
                        article_key: article_key.clone(),
                        return_index,
                    },
                    Effect::ToggleBookmark(article_key),
                ),
                E::OpenSettings => Transition::stay(View::Settings { return_to: category }),
                E::SelectCategory(_)
                | E::MoveSelection(_)
                | E::OpenSelected
                | E::Refresh
                | E::EditConfig(_) => Transition::stay(View::Detail {
                    category,
                    article_key,
                    return_index,
                }),
                E::Quit => Transition::to(View::Exited, Effect::Exit),
            },

            (View::Settings { return_to }, event) => match event {
                E::Back => {
                    Transition::to(View::dashboard(return_to.clone()), Effect::Refresh(return_to))
                }
                E::EditConfig(edit) => {
                    Transition::to(View::Settings { return_to }, Effect::PersistConfig(edit))
                }
                E::SelectCategory(_)
                | E::MoveSelection(_)
                | E::OpenSelected
                | E::OpenSettings
                | E::Refresh
                | E::ToggleBookmark => Transition::stay(View::Settings { return_to }),
                E::Quit => Transition::to(View::Exited, Effect::Exit),
            },
        }
    }
}

fn clamp_selection(selected: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let next = selected as isize + delta;
    next.clamp(0, len as isize - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(categories: &'a [String], keys: &'a [String]) -> ViewContext<'a> {
        ViewContext { categories, visible_keys: keys }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn open_and_back_restores_selection() {
        let cats = strings(&["tech", "world"]);
        let keys = strings(&["a", "b", "c"]);
        let ctx = ctx(&cats, &keys);

        let t = View::dashboard("tech").apply(UiEvent::MoveSelection(2), &ctx);
        assert_eq!(t.view, View::Dashboard { category: "tech".into(), selected: 2 });

        let t = t.view.apply(UiEvent::OpenSelected, &ctx);
        assert_eq!(t.effect, Some(Effect::LoadRelated("c".into())));

        let t = t.view.apply(UiEvent::Back, &ctx);
        assert_eq!(t.view, View::Dashboard { category: "tech".into(), selected: 2 });
        assert_eq!(t.effect, None);
    }

    #[test]
    fn selection_is_clamped() {
        let cats = strings(&["tech"]);
        let keys = strings(&["a", "b"]);
        let ctx = ctx(&cats, &keys);

        let t = View::dashboard("tech").apply(UiEvent::MoveSelection(-5), &ctx);
        assert_eq!(t.view, View::Dashboard { category: "tech".into(), selected: 0 });
        let t = t.view.apply(UiEvent::MoveSelection(10), &ctx);
        assert_eq!(t.view, View::Dashboard { category: "tech".into(), selected: 1 });
    }

    #[test]
    fn unknown_category_is_ignored() {
        let cats = strings(&["tech"]);
        let ctx = ctx(&cats, &[]);
        let t = View::dashboard("tech").apply(UiEvent::SelectCategory("sports".into()), &ctx);
        assert_eq!(t.view, View::dashboard("tech"));
        assert_eq!(t.effect, None);
    }

    #[test]
    fn settings_edits_are_persisted_and_back_refreshes() {
        let cats = strings(&["tech"]);
        let ctx = ctx(&cats, &[]);
        let t = View::dashboard("tech").apply(UiEvent::OpenSettings, &ctx);
        assert_eq!(t.view, View::Settings { return_to: "tech".into() });

        let edit = ConfigEdit::RemoveSource { name: "hn".into() };
        let t = t.view.apply(UiEvent::EditConfig(edit.clone()), &ctx);
        assert_eq!(t.effect, Some(Effect::PersistConfig(edit)));

        let t = t.view.apply(UiEvent::Back, &ctx);
        assert_eq!(t.view, View::dashboard("tech"));
        assert_eq!(t.effect, Some(Effect::Refresh("tech".into())));
    }

    #[test]
    fn quit_from_anywhere_exits_once() {
        let ctx = ctx(&[], &[]);
        let t = View::Settings { return_to: "tech".into() }.apply(UiEvent::Quit, &ctx);
        assert_eq!(t.view, View::Exited);
        assert_eq!(t.effect, Some(Effect::Exit));

        let t = t.view.apply(UiEvent::Quit, &ctx);
        assert_eq!(t.effect, None);
    }
}
