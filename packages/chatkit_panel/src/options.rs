//! Widget configuration handed to the ChatKit component.

use serde::Serialize;

use crate::tools::ColorScheme;

pub const GREETING: &str =
    "Hi! I'm here to help you find your next great job. What would you like to work on today?";

pub const PLACEHOLDER_INPUT: &str = "Ask about jobs, resumes, interviews, or career advice...";

/// (label, prompt) pairs offered on the start screen.
pub const STARTER_PROMPTS: &[(&str, &str)] = &[
    ("Find jobs near me", "Help me find job opportunities in my area"),
    (
        "Review my resume",
        "Review my resume and suggest improvements for job applications",
    ),
    (
        "Practice interview questions",
        "Help me practice common interview questions",
    ),
    (
        "Job search strategy",
        "Give me advice on my job search strategy",
    ),
];

const PROMPT_ICON: &str = "circle-question";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetOptions {
    pub theme: ThemeOption,
    pub start_screen: StartScreen,
    pub composer: Composer,
    pub thread_item_actions: ThreadItemActions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeOption {
    pub color_scheme: ColorScheme,
    pub color: ThemeColor,
    pub radius: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThemeColor {
    pub grayscale: Grayscale,
    pub accent: Accent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grayscale {
    pub hue: u16,
    pub tint: u8,
    pub shade: i8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accent {
    pub primary: String,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartScreen {
    pub greeting: String,
    pub prompts: Vec<StarterPrompt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StarterPrompt {
    pub label: String,
    pub prompt: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Composer {
    pub placeholder: String,
    pub attachments: Toggle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toggle {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadItemActions {
    pub feedback: bool,
}

impl ThemeOption {
    pub fn for_scheme(scheme: ColorScheme) -> Self {
        let (shade, primary) = match scheme {
            ColorScheme::Dark => (-1, "#3b82f6"),
            ColorScheme::Light => (-4, "#1e40af"),
        };
        Self {
            color_scheme: scheme,
            color: ThemeColor {
                grayscale: Grayscale {
                    hue: 220,
                    tint: 6,
                    shade,
                },
                accent: Accent {
                    primary: primary.to_string(),
                    level: 1,
                },
            },
            radius: "round".to_string(),
        }
    }
}

impl WidgetOptions {
    pub fn for_scheme(scheme: ColorScheme) -> Self {
        Self {
            theme: ThemeOption::for_scheme(scheme),
            start_screen: StartScreen {
                greeting: GREETING.to_string(),
                prompts: STARTER_PROMPTS
                    .iter()
                    .map(|(label, prompt)| StarterPrompt {
                        label: label.to_string(),
                        prompt: prompt.to_string(),
                        icon: PROMPT_ICON.to_string(),
                    })
                    .collect(),
            },
            composer: Composer {
                placeholder: PLACEHOLDER_INPUT.to_string(),
                attachments: Toggle { enabled: true },
            },
            thread_item_actions: ThreadItemActions { feedback: false },
        }
    }
}
