//! HTML index page served at `/`

use shared::LeaderboardEntry;
use std::fmt::Write;

/// Escapes text for use in HTML element content and quoted attributes
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Renders the landing page with the top scores and the current player
pub fn render_index(player_name: &str, top_scores: &[LeaderboardEntry]) -> String {
    let mut rows = String::new();
    for entry in top_scores {
        // Writing into a String cannot fail.
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            entry.rank,
            escape_html(&entry.username),
            entry.score,
            entry.games_played
        );
    }
    if rows.is_empty() {
        rows.push_str("<tr><td colspan=\"4\">No scores yet</td></tr>");
    }

    format!(
        "<!DOCTYPE html>
<html lang=\"en\">
<head>
<meta charset=\"utf-8\">
<title>Snake 3D</title>
</head>
<body>
<h1>Snake 3D</h1>
<p id=\"player\">Playing as <strong>{player}</strong></p>
<div id=\"game\"></div>
<h2>Top scores</h2>
<table id=\"leaderboard\">
<thead><tr><th>Rank</th><th>Player</th><th>Score</th><th>Games</th></tr></thead>
<tbody>{rows}</tbody>
</table>
</body>
</html>
",
        player = escape_html(player_name),
        rows = rows
    )
}
