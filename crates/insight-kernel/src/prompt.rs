use insight_contracts::{
    ActivitySnapshot, AlertSnapshot, ChatMessage, ContactSummaryRequest, DealSnapshot,
    DigestRequest, NextStepRequest, TaskSnapshot, Timeframe,
};

const ROLE_DIRECTIVE: &str = "Eres un asistente comercial experto en CRM. \
Responde siempre en español, con tono profesional, directo y breve.";

const JSON_DIRECTIVE: &str =
    "Devuelve únicamente JSON válido, sin texto adicional ni bloques de código, con esta forma exacta:";

pub const DIGEST_SHAPE: &str =
    r#"{"headline": "string", "summary": ["string"], "actions": ["string"], "content": "string"}"#;

pub const NEXT_STEP_SHAPE: &str =
    r#"{"recommendation": "string", "rationale": ["string"], "content": "string"}"#;

pub const CONTACT_SUMMARY_SHAPE: &str =
    r#"{"summary": "string", "highlights": ["string"], "content": "string"}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system), ChatMessage::user(self.user)]
    }
}

pub fn digest_prompt(req: &DigestRequest, max_items: usize) -> Prompt {
    let system = instructions(
        DIGEST_SHAPE,
        &[
            "headline: una frase de máximo 12 palabras sobre el estado del pipeline.",
            "summary: 1 o 2 párrafos cortos.",
            "actions: de 3 a 5 textos, cada uno empieza con un verbo en imperativo.",
            "content: el resumen completo en texto plano.",
            "No inventes oportunidades, montos ni fechas que no aparezcan en los datos.",
        ],
    );

    let mut user = format!(
        "Periodo: {}\n\nIndicadores:\n- Oportunidades calientes: {}\n- Oportunidades en riesgo: {}\n- Tareas vencidas: {}\n",
        timeframe_label(req.timeframe),
        req.stats.hot_deals,
        req.stats.risk_deals,
        req.stats.overdue_tasks,
    );

    user.push_str("\nOportunidades principales:\n");
    push_list(&mut user, &req.top_deals, max_items, deal_line);

    user.push_str("\nAlertas:\n");
    push_list(&mut user, &req.alerts, max_items, alert_line);

    Prompt { system, user }
}

pub fn next_step_prompt(req: &NextStepRequest, max_items: usize) -> Prompt {
    let system = instructions(
        NEXT_STEP_SHAPE,
        &[
            "recommendation: una sola acción concreta que empiece con un verbo en imperativo.",
            "rationale: de 2 a 4 razones breves basadas en los datos.",
            "content: la recomendación y su justificación en texto plano.",
        ],
    );

    let mut user = String::from("Oportunidad:\n");
    push_deal_fields(&mut user, &req.deal);

    user.push_str("\nActividad reciente:\n");
    push_list(&mut user, &req.recent_activities, max_items, activity_line);

    user.push_str("\nTareas abiertas:\n");
    push_list(&mut user, &req.open_tasks, max_items, task_line);

    Prompt { system, user }
}

pub fn contact_summary_prompt(req: &ContactSummaryRequest, max_items: usize) -> Prompt {
    let system = instructions(
        CONTACT_SUMMARY_SHAPE,
        &[
            "summary: un párrafo de máximo 3 frases sobre la relación con el contacto.",
            "highlights: de 2 a 5 puntos clave breves.",
            "content: el resumen completo en texto plano.",
        ],
    );

    let contact = &req.contact;
    let mut user = String::from("Contacto:\n");
    user.push_str(&format!("- Nombre: {}\n", contact.name));
    push_opt(&mut user, "Cargo", contact.role.as_deref());
    push_opt(&mut user, "Empresa", contact.company.as_deref());
    push_opt(&mut user, "Email", contact.email.as_deref());
    push_opt(&mut user, "Teléfono", contact.phone.as_deref());
    push_opt(&mut user, "Último contacto", contact.last_contacted_at.as_deref());
    if !contact.tags.is_empty() {
        user.push_str(&format!("- Etiquetas: {}\n", contact.tags.join(", ")));
    }
    push_opt(&mut user, "Notas", contact.notes.as_deref());

    user.push_str("\nOportunidades asociadas:\n");
    push_list(&mut user, &req.deals, max_items, deal_line);

    user.push_str("\nActividad reciente:\n");
    push_list(&mut user, &req.recent_activities, max_items, activity_line);

    Prompt { system, user }
}

fn instructions(shape: &str, rules: &[&str]) -> String {
    let mut out = format!("{ROLE_DIRECTIVE}\n{JSON_DIRECTIVE}\n{shape}\n\nReglas:\n");
    for rule in rules {
        out.push_str("- ");
        out.push_str(rule);
        out.push('\n');
    }
    out
}

fn timeframe_label(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Today => "hoy",
        Timeframe::Week => "esta semana",
        Timeframe::Month => "este mes",
    }
}

fn push_list<T>(out: &mut String, items: &[T], max_items: usize, line: fn(&T) -> String) {
    if items.is_empty() {
        out.push_str("- (ninguna)\n");
        return;
    }
    for (idx, item) in items.iter().take(max_items).enumerate() {
        out.push_str(&format!("{}. {}\n", idx + 1, line(item)));
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn push_opt(out: &mut String, label: &str, value: Option<&str>) {
    if let Some(v) = present(value) {
        out.push_str(&format!("- {label}: {v}\n"));
    }
}

fn push_deal_fields(out: &mut String, deal: &DealSnapshot) {
    out.push_str(&format!("- Título: {}\n", deal.title));
    out.push_str(&format!("- Etapa: {}\n", deal.stage));
    push_opt(out, "Cuenta", deal.account_name.as_deref());
    push_opt(out, "Prioridad", deal.priority.as_deref());
    push_opt(out, "Riesgo", deal.risk.as_deref());
    if let Some(amount) = deal.amount {
        out.push_str(&format!(
            "- Monto: {}\n",
            amount_label(amount, deal.currency.as_deref())
        ));
    }
    push_opt(out, "Próximo paso", deal.next_step.as_deref());
    push_opt(out, "Cierre objetivo", deal.target_close_date.as_deref());
}

fn deal_line(deal: &DealSnapshot) -> String {
    let mut parts = vec![deal.title.clone(), format!("etapa: {}", deal.stage)];
    push_part(&mut parts, "cuenta", deal.account_name.as_deref());
    push_part(&mut parts, "prioridad", deal.priority.as_deref());
    push_part(&mut parts, "riesgo", deal.risk.as_deref());
    if let Some(amount) = deal.amount {
        parts.push(format!(
            "monto: {}",
            amount_label(amount, deal.currency.as_deref())
        ));
    }
    push_part(&mut parts, "próximo paso", deal.next_step.as_deref());
    push_part(&mut parts, "cierre", deal.target_close_date.as_deref());
    parts.join(" | ")
}

fn push_part(parts: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(v) = present(value) {
        parts.push(format!("{label}: {v}"));
    }
}

fn alert_line(alert: &AlertSnapshot) -> String {
    format!("[{}] {}: {}", alert.severity, alert.kind, alert.message)
}

fn activity_line(activity: &ActivitySnapshot) -> String {
    format!(
        "{} ({}): {}",
        activity.kind, activity.occurred_at, activity.summary
    )
}

fn task_line(task: &TaskSnapshot) -> String {
    let mut line = task.title.clone();
    if let Some(due) = present(task.due_date.as_deref()) {
        line.push_str(&format!(" | vence: {due}"));
    }
    if let Some(status) = present(task.status.as_deref()) {
        line.push_str(&format!(" | estado: {status}"));
    }
    line
}

fn amount_label(amount: f64, currency: Option<&str>) -> String {
    let number = if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else {
        format!("{amount:.2}")
    };
    match currency {
        Some(c) if !c.trim().is_empty() => format!("{number} {}", c.trim()),
        _ => number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_contracts::{ContactSnapshot, DigestStats, Role};

    fn deal(n: usize) -> DealSnapshot {
        DealSnapshot {
            id: format!("d{n}"),
            title: format!("Oportunidad {n}"),
            stage: "proposal".to_string(),
            ..Default::default()
        }
    }

    fn digest(deals: usize) -> DigestRequest {
        DigestRequest {
            timeframe: Timeframe::Week,
            stats: DigestStats {
                hot_deals: 2,
                risk_deals: 1,
                overdue_tasks: 3,
            },
            top_deals: (1..=deals).map(deal).collect(),
            alerts: vec![],
            fallback_text: "x".to_string(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn digest_prompt_embeds_shape_and_stats() {
        let prompt = digest_prompt(&digest(2), 5);
        assert!(prompt.system.contains(DIGEST_SHAPE));
        assert!(prompt.system.contains("de 3 a 5"));
        assert!(prompt.user.contains("Periodo: esta semana"));
        assert!(prompt.user.contains("Oportunidades calientes: 2"));
        assert!(prompt.user.contains("Tareas vencidas: 3"));
        assert!(prompt.user.contains("2. Oportunidad 2 | etapa: proposal"));
    }

    #[test]
    fn digest_prompt_truncates_to_max_items() {
        let prompt = digest_prompt(&digest(8), 5);
        assert!(prompt.user.contains("5. Oportunidad 5"));
        assert!(!prompt.user.contains("Oportunidad 6"));
    }

    #[test]
    fn digest_prompt_is_deterministic() {
        assert_eq!(digest_prompt(&digest(3), 5), digest_prompt(&digest(3), 5));
    }

    #[test]
    fn empty_lists_render_placeholder() {
        let prompt = digest_prompt(&digest(0), 5);
        assert!(prompt.user.contains("Alertas:\n- (ninguna)"));
    }

    #[test]
    fn next_step_prompt_omits_absent_fields() {
        let mut d = deal(1);
        d.amount = Some(15000.0);
        d.currency = Some("EUR".to_string());
        let req = NextStepRequest {
            deal: d,
            recent_activities: vec![],
            open_tasks: vec![TaskSnapshot {
                title: "Enviar propuesta".to_string(),
                due_date: Some("2026-10-20".to_string()),
                status: None,
            }],
            fallback_text: "x".to_string(),
            metadata: Default::default(),
        };
        let prompt = next_step_prompt(&req, 5);
        assert!(prompt.system.contains(NEXT_STEP_SHAPE));
        assert!(prompt.user.contains("- Monto: 15000 EUR"));
        assert!(!prompt.user.contains("Riesgo"));
        assert!(!prompt.user.contains("Cierre objetivo"));
        assert!(prompt.user.contains("1. Enviar propuesta | vence: 2026-10-20\n"));
    }

    #[test]
    fn contact_prompt_renders_optional_fields_only_when_present() {
        let req = ContactSummaryRequest {
            contact: ContactSnapshot {
                id: "c1".to_string(),
                name: "Ana Pérez".to_string(),
                company: Some("ACME".to_string()),
                email: Some("   ".to_string()),
                tags: vec!["decisor".to_string(), "vip".to_string()],
                ..Default::default()
            },
            deals: vec![deal(1)],
            recent_activities: vec![],
            fallback_text: "x".to_string(),
            metadata: Default::default(),
        };
        let prompt = contact_summary_prompt(&req, 5);
        assert!(prompt.user.contains("- Nombre: Ana Pérez"));
        assert!(prompt.user.contains("- Empresa: ACME"));
        assert!(prompt.user.contains("- Etiquetas: decisor, vip"));
        assert!(!prompt.user.contains("Email"));
        assert!(!prompt.user.contains("Teléfono"));
    }

    #[test]
    fn deal_line_skips_blank_optional_fields() {
        let mut req = digest(0);
        req.top_deals = vec![DealSnapshot {
            id: "d1".to_string(),
            title: "ACME".to_string(),
            stage: "proposal".to_string(),
            account_name: Some("".to_string()),
            priority: Some("  ".to_string()),
            risk: Some("alto".to_string()),
            next_step: Some(" Enviar contrato ".to_string()),
            target_close_date: Some(String::new()),
            ..Default::default()
        }];
        let prompt = digest_prompt(&req, 5);
        let line = "1. ACME | etapa: proposal | riesgo: alto | próximo paso: Enviar contrato\n";
        assert!(prompt.user.contains(line));
        assert!(!prompt.user.contains("cuenta:"));
        assert!(!prompt.user.contains("prioridad:"));
        assert!(!prompt.user.contains("cierre:"));
    }

    #[test]
    fn prompt_becomes_system_then_user_messages() {
        let messages = digest_prompt(&digest(1), 5).into_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
    }
}
