//! Browser form served at `/`.

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Chatterbox Voice Synthesis API</title>
    <style>
        body { font-family: sans-serif; background: #f9fafb; margin: 0; }
        main { max-width: 42rem; margin: 2rem auto; padding: 0 1rem; }
        form { background: #fff; border-radius: .5rem; padding: 1.5rem; box-shadow: 0 1px 3px #0002; }
        label { display: block; font-weight: 600; margin: 1rem 0 .25rem; }
        textarea, select, input { width: 100%; box-sizing: border-box; padding: .5rem; }
        button { margin-top: 1.5rem; width: 100%; padding: .75rem; background: #2563eb; color: #fff; border: 0; border-radius: .375rem; }
        button:disabled { opacity: .5; }
        .hint { color: #6b7280; font-size: .75rem; }
        #result { margin-top: 1.5rem; }
    </style>
</head>
<body>
<main>
    <h1>Chatterbox Voice Synthesis API</h1>
    <p>Generate realistic voice synthesis using AI</p>
    <form id="voiceForm">
        <label for="text">Text to synthesize</label>
        <textarea id="text" rows="3" required>Hello, this is a test of the voice synthesis system.</textarea>

        <label for="voice">Voice</label>
        <select id="voice" required>{{VOICE_OPTIONS}}</select>

        <label for="exageration">Exaggeration</label>
        <input type="number" id="exageration" step="0.1" min="0" max="10" value="0.5">
        <p class="hint">Default: 0.5</p>

        <label for="cfg_weight">CFG Weight</label>
        <input type="number" id="cfg_weight" step="0.1" min="0" max="10" value="0.5">
        <p class="hint">Default: 0.5</p>

        <label for="output_filename">Output Filename (optional)</label>
        <input type="text" id="output_filename" placeholder="custom_voice">
        <p class="hint">.wav extension will be added automatically</p>

        <button type="submit">Generate Voice</button>
    </form>
    <div id="result"></div>
</main>
<script>
    document.getElementById('voiceForm').addEventListener('submit', async (e) => {
        e.preventDefault();
        const voice = document.getElementById('voice').value;
        const body = {
            text: document.getElementById('text').value,
            voice,
            exageration: parseFloat(document.getElementById('exageration').value),
            cfg_weight: parseFloat(document.getElementById('cfg_weight').value),
            output_filename: document.getElementById('output_filename').value || undefined,
        };
        const button = document.querySelector('button[type="submit"]');
        const result = document.getElementById('result');
        button.disabled = true;
        button.textContent = 'Generating...';
        result.textContent = 'Generating voice... This may take 30-60 seconds';
        try {
            const response = await fetch('/synthesize', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify(body),
            });
            if (response.ok) {
                const url = URL.createObjectURL(await response.blob());
                result.innerHTML = '<audio controls src="' + url + '"></audio> ' +
                    '<a href="' + url + '" download="' + voice + '_voice.wav">Download WAV</a>';
            } else {
                const error = await response.json();
                result.textContent = 'Error: ' + error.error;
            }
        } catch (error) {
            result.textContent = 'Error: ' + error.message;
        } finally {
            button.disabled = false;
            button.textContent = 'Generate Voice';
        }
    });
</script>
</body>
</html>
"#;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render the index page with one `<option>` per voice.
pub fn render_index(voices: &[String]) -> String {
    let options: String = voices
        .iter()
        .map(|voice| {
            let voice = escape(voice);
            format!(r#"<option value="{}">{}</option>"#, voice, voice)
        })
        .collect();
    TEMPLATE.replace("{{VOICE_OPTIONS}}", &options)
}
