// Prompt construction for each generation type

use super::{GenerationKind, GenerationRequest};

const ANIMATION_PROMPT: &str = "You are an expert game animator. Produce keyframe animation data \
for a humanoid character rig. Each keyframe names a bone, the time in seconds from the start of \
the clip, and the bone's rotation in degrees (x, y, z) and position offset in studs (x, y, z). \
Keep motion physically plausible and make looping clips start and end in the same pose.";

const VFX_PROMPT: &str = "You are a visual effects artist for real-time games. Design particle \
effects as a set of emitters. For each emitter give its texture style, emission rate per second, \
lifetime and speed ranges, size, and a color sequence of hex colors from birth to death.";

const SCRIPT_PROMPT: &str = "You are a senior gameplay programmer writing Luau scripts. Produce \
complete, runnable code with no placeholders, followed by a short explanation of how it works \
and where it should be placed.";

const UI_PROMPT: &str = "You are a game UI designer. Lay out screen interfaces as a flat list of \
elements. Positions and sizes are scale values between 0 and 1 relative to the parent screen; \
use readable text and consistent spacing.";

const STRUCTURED_SUFFIX: &str = "Respond with a single JSON object that matches the provided \
schema exactly. Do not wrap it in Markdown and do not add commentary.";

pub fn default_system_prompt(kind: GenerationKind) -> &'static str {
    match kind {
        GenerationKind::Animation => ANIMATION_PROMPT,
        GenerationKind::Vfx => VFX_PROMPT,
        GenerationKind::Script => SCRIPT_PROMPT,
        GenerationKind::Ui => UI_PROMPT,
    }
}

pub fn system_prompt(request: &GenerationRequest, structured: bool) -> String {
    let base = request
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| default_system_prompt(request.kind));

    if structured {
        format!("{}\n\n{}", base, STRUCTURED_SUFFIX)
    } else {
        base.to_string()
    }
}

pub fn user_prompt(request: &GenerationRequest) -> String {
    let mut prompt = request.user_prompt.trim().to_string();
    let mut params = Vec::new();

    if let Some(rig_type) = request.rig_type.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        params.push(format!("Rig type: {}", rig_type));
    }
    if let Some(duration) = request.duration {
        params.push(format!("Duration: {} seconds", duration));
    }
    if let Some(count) = request.keyframe_count {
        params.push(format!("Keyframes: {}", count));
    }

    if !params.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&params.join("\n"));
    }
    prompt
}
