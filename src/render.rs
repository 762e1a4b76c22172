// HTML fragments written into the dashboard page, one per element id.

use crate::departures::{FormattedTrip, ServiceState, StopBoard, TripStatus};
use crate::gtfs_schedule::LineSchedule;
use crate::news::Headline;
use crate::siri_api_models::GeneralMessage;
use crate::traffic::TrafficReport;
use crate::velib::VelibAvailability;
use crate::weather::WeatherReport;
use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Europe::Paris;

const WEEKDAYS_FR: [&str; 7] = ["lundi", "mardi", "mercredi", "jeudi", "vendredi", "samedi", "dimanche"];
const MONTHS_FR: [&str; 12] = [
    "janvier", "février", "mars", "avril", "mai", "juin",
    "juillet", "août", "septembre", "octobre", "novembre", "décembre",
];

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `HH:MM` in Paris time.
pub fn format_time(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Paris).format("%H:%M").to_string()
}

pub fn format_time_with_seconds(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Paris).format("%H:%M:%S").to_string()
}

/// Long French date, e.g. "jeudi 15 octobre 2026".
pub fn format_date_fr(instant: DateTime<Utc>) -> String {
    let local = instant.with_timezone(&Paris);
    let weekday = match local.weekday() {
        Weekday::Mon => WEEKDAYS_FR[0],
        Weekday::Tue => WEEKDAYS_FR[1],
        Weekday::Wed => WEEKDAYS_FR[2],
        Weekday::Thu => WEEKDAYS_FR[3],
        Weekday::Fri => WEEKDAYS_FR[4],
        Weekday::Sat => WEEKDAYS_FR[5],
        Weekday::Sun => WEEKDAYS_FR[6],
    };
    format!(
        "{} {} {} {}",
        weekday,
        local.day(),
        MONTHS_FR[local.month0() as usize],
        local.year()
    )
}

/// "24:42:00" -> "24:42"
fn gtfs_hhmm(time: &str) -> &str {
    time.rsplit_once(':').map(|(hhmm, _)| hhmm).unwrap_or(time)
}

fn title_line(icon: &str, title: &str) -> String {
    format!(
        "<div class='title-line'><img src='{}' class='icon-inline'>{}</div>",
        escape_html(icon),
        escape_html(title)
    )
}

fn trip_label(trip: &FormattedTrip) -> (String, &'static str) {
    match trip.status {
        TripStatus::Imminent => ("🟢 À l'approche".to_string(), "imminent"),
        TripStatus::AtStop => ("🚉 À quai".to_string(), "at-stop"),
        TripStatus::Cancelled => ("❌ Supprimé".to_string(), "cancelled"),
        TripStatus::Departed => ("Parti".to_string(), "departed"),
        TripStatus::Delayed { minutes } => (
            format!("dans {} min · ⏱ +{} min", trip.minutes_until, minutes),
            "delayed",
        ),
        TripStatus::Early { minutes } => (
            format!("dans {} min · en avance de {} min", trip.minutes_until, minutes),
            "early",
        ),
        TripStatus::OnTime => (format!("dans {} min", trip.minutes_until), "on-time"),
    }
}

pub fn render_stop_board(
    board: &StopBoard,
    messages: &[GeneralMessage],
    schedule: Option<&LineSchedule>,
) -> String {
    let mut html = title_line(&board.icon, &board.name);
    let vehicle = escape_html(&board.vehicle_label);

    match &board.state {
        ServiceState::Running => {
            for group in &board.groups {
                html.push_str(&format!(
                    "<div class='destination'>→ {}</div><ul>",
                    escape_html(&group.destination)
                ));
                for trip in &group.trips {
                    let (label, class) = trip_label(trip);
                    html.push_str(&format!(
                        "<li class='trip {}'><b>{}</b> {}</li>",
                        class,
                        format_time(trip.departure),
                        escape_html(&label)
                    ));
                }
                html.push_str("</ul>");
            }
            if let (Some(first), Some(last)) = (board.first_departure, board.last_departure) {
                html.push_str(&format!(
                    "<div class='schedule-extremes'>Premier départ : {}<br>Dernier départ : {}</div>",
                    format_time(first),
                    format_time(last)
                ));
            }
        }
        ServiceState::NotStarted { first } => {
            html.push_str(&format!(
                "<ul><li>⏳ Service non commencé – premier {} prévu à {}</li></ul>\
                 <div class='schedule-extremes'>Aucun passage en cours</div>",
                vehicle,
                format_time(*first)
            ));
        }
        ServiceState::Ended { next } => {
            let message = match next {
                Some(next) => format!(
                    "✅ Service terminé – prochain {} demain à {}",
                    vehicle,
                    format_time(*next)
                ),
                None => "✅ Service terminé".to_string(),
            };
            html.push_str(&format!(
                "<ul><li>{}</li></ul><div class='schedule-extremes'>Aucun passage en cours</div>",
                message
            ));
        }
    }

    if board.state != ServiceState::Running {
        if let Some(LineSchedule { first_departure: Some(first), last_departure: Some(last), .. }) = schedule {
            html.push_str(&format!(
                "<div class='weekly-schedule'>Cette semaine : premier départ {}, dernier départ {}</div>",
                escape_html(gtfs_hhmm(first)),
                escape_html(gtfs_hhmm(last))
            ));
        }
    }

    if !messages.is_empty() {
        html.push_str("<div class='disruptions'>");
        for message in messages {
            html.push_str(&format!("<div class='disruption'>⚠️ {}</div>", escape_html(&message.text)));
        }
        html.push_str("</div>");
    }

    html
}

pub fn render_weather(report: Option<&WeatherReport>) -> String {
    let mut html = "<div class='bloc-titre'><img src='img/picto-meteo.svg' class='icon-inline'>Météo</div>".to_string();
    match report {
        Some(report) => html.push_str(&format!(
            "<div class='weather'><img src='{}' class='weather-icon' alt='{}'>\
             <div><div>🌡️ <b>{}°C</b></div><div>💨 {} km/h</div><div>🌤️ {}</div></div></div>",
            escape_html(&report.icon),
            escape_html(report.label),
            report.temperature_c,
            report.wind_kmh,
            escape_html(report.label)
        )),
        None => html.push_str("<div>Météo indisponible</div>"),
    }
    html
}

pub fn render_velib(station: &VelibAvailability) -> String {
    format!(
        "{}🚲 Mécaniques : {}<br>⚡ Électriques : {}<br>🅿️ Places libres : {}",
        title_line("img/picto-velib.svg", &station.name),
        station.mechanical,
        station.ebikes,
        station.free_docks
    )
}

pub fn render_traffic(report: &TrafficReport) -> String {
    let mut html = format!(
        "<div class='bloc-titre'><img src='img/picto-info.svg' class='icon-inline'>Info trafic routier autour de l’hippodrome</div>\
         <div class='traffic-state' style='border-left:10px solid {}'>🚦 État global du trafic : <b>{}</b></div>",
        report.state.level.color(),
        escape_html(&report.state.message)
    );

    if !report.incidents.is_empty() {
        html.push_str("<ul class='incidents'>");
        for incident in &report.incidents {
            let text = incident
                .comment
                .as_deref()
                .or(incident.road.as_deref())
                .unwrap_or(incident.record_type.as_str());
            html.push_str(&format!("<li>{}</li>", escape_html(text)));
        }
        html.push_str("</ul>");
    }

    html.push_str(
        "<div class='traffic-link'><a href='https://www.sytadin.fr/' target='_blank' rel='noopener'>Voir carte Sytadin</a></div>",
    );
    html
}

pub fn render_news(headline: Option<&Headline>, position: usize, total: usize) -> String {
    match headline {
        Some(h) => format!(
            "<div class='news-item'><a href='{}' target='_blank' rel='noopener'>📰 {}</a> <span class='news-count'>{}/{}</span></div>",
            escape_html(&h.link),
            escape_html(&h.title),
            position + 1,
            total
        ),
        None => "<div class='news-item'>📰 Aucune actualité</div>".to_string(),
    }
}

pub fn render_error(title: &str, icon: &str, message: &str) -> String {
    format!(
        "{}<div class='widget-error'>⚠️ {}</div>",
        title_line(icon, title),
        escape_html(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STOPS;
    use crate::departures::{build_stop_board, TransitVisit};
    use crate::traffic::{TrafficLevel, TrafficState};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 7, 0, 0).unwrap()
    }

    #[test]
    fn times_are_paris_local() {
        // CEST in October: UTC+2
        assert_eq!(format_time(now()), "09:00");
        assert_eq!(format_time_with_seconds(now() + Duration::seconds(5)), "09:00:05");
        assert_eq!(format_date_fr(now()), "jeudi 15 octobre 2026");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>\"R&D\"</b>"), "&lt;b&gt;&quot;R&amp;D&quot;&lt;/b&gt;");
    }

    #[test]
    fn empty_board_renders_service_ended() {
        let board = build_stop_board(&STOPS[0], &[], None, now(), 4);
        let html = render_stop_board(&board, &[], None);
        assert!(html.contains("Service terminé"));
        assert!(html.contains("RER A Joinville-le-Pont"));
        assert!(html.contains("Aucun passage en cours"));
    }

    #[test]
    fn ended_board_announces_tomorrows_first_departure() {
        let mut board = build_stop_board(&STOPS[1], &[], None, now(), 4);
        board.state = ServiceState::Ended { next: Some(now() + Duration::hours(20)) };
        let html = render_stop_board(&board, &[], None);
        assert!(html.contains(&format!("prochain {} demain à 05:00", board.vehicle_label)), "{}", html);
    }

    #[test]
    fn not_started_board_names_the_vehicle() {
        let board = build_stop_board(&STOPS[1], &[], Some(now() + Duration::hours(1)), now(), 4);
        let html = render_stop_board(&board, &[], None);
        assert!(html.contains("premier bus prévu à 10:00"));
    }

    #[test]
    fn running_board_lists_groups_and_extremes() {
        let visits = vec![
            TransitVisit {
                destination: Some("Boissy-Saint-Léger".into()),
                expected_departure: Some(now() + Duration::seconds(60)),
                ..Default::default()
            },
            TransitVisit {
                destination: Some("Saint-Germain-en-Laye <express>".into()),
                aimed_departure: Some(now() + Duration::minutes(10)),
                expected_departure: Some(now() + Duration::minutes(13)),
                ..Default::default()
            },
        ];
        let board = build_stop_board(&STOPS[0], &visits, None, now(), 4);
        let messages = vec![GeneralMessage {
            id: "m".into(),
            channel: None,
            text: "Travaux à Nation".into(),
            valid_until: None,
        }];
        let html = render_stop_board(&board, &messages, None);

        assert!(html.contains("À l&#39;approche"));
        assert!(html.contains("Saint-Germain-en-Laye &lt;express&gt;"));
        assert!(html.contains("dans 13 min · ⏱ +3 min"));
        assert!(html.contains("Premier départ : 09:01<br>Dernier départ : 09:13"));
        assert!(html.contains("Travaux à Nation"));
    }

    #[test]
    fn idle_board_shows_weekly_schedule() {
        let schedule = LineSchedule {
            line: "A".into(),
            route_ids: vec![],
            trips: 12,
            first_departure: Some("05:03:00".into()),
            last_departure: Some("24:42:00".into()),
            stops: vec![],
        };
        let board = build_stop_board(&STOPS[0], &[], None, now(), 4);
        let html = render_stop_board(&board, &[], Some(&schedule));
        assert!(html.contains("premier départ 05:03, dernier départ 24:42"));
    }

    #[test]
    fn traffic_colour_is_applied() {
        let report = TrafficReport {
            state: TrafficState { message: "Dense".into(), level: TrafficLevel::Dense },
            incidents: vec![],
        };
        assert!(render_traffic(&report).contains("border-left:10px solid orange"));
    }

    #[test]
    fn news_counts_from_one() {
        let headline = Headline {
            title: "Titre".into(),
            link: "https://x.test".into(),
            published: String::new(),
            summary: String::new(),
        };
        assert!(render_news(Some(&headline), 0, 3).contains("1/3"));
        assert!(render_news(None, 0, 0).contains("Aucune actualité"));
    }
}
